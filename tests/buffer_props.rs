//! Property suite for the buffer helpers, string codecs and framing.

mod common;

use common::init_test_logging;
use evio::buffer::{strings, ByteBuffer};
use evio::channels::framed::{
    install_message_reader, FramedMessageWriter, MessageHandler,
};
use evio::channels::pipe::stream_pair;
use evio::channels::WritableMessageChannel;
use evio::options::{OptionMap, RECEIVE_BUFFER};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

proptest! {
    /// `decode(encode(s)) == s` for every string of U+0001..U+FFFF.
    #[test]
    fn modified_utf8_round_trip(
        chars in prop::collection::vec(prop::char::range('\u{1}', '\u{ffff}'), 0..128)
    ) {
        init_test_logging();
        let text: String = chars.into_iter().collect();
        let mut buf = ByteBuffer::allocate(text.len() * 3 + 8);
        strings::put_modified_utf8(&mut buf, &text).unwrap();
        buf.flip();
        let mut decoded = String::new();
        strings::read_modified_utf8(&mut buf, &mut decoded, '?').unwrap();
        prop_assert_eq!(decoded, text);
        prop_assert!(!buf.has_remaining());
    }

    /// `position + remaining == limit` holds after every successful helper
    /// call, and the position is untouched when a bounds error is raised.
    #[test]
    fn helper_postconditions(
        data in prop::collection::vec(any::<u8>(), 1..256),
        skip in 0usize..300,
        slice in -300isize..300,
    ) {
        init_test_logging();
        let mut buf = ByteBuffer::from_slice(&data);
        prop_assert_eq!(buf.position() + buf.remaining(), buf.limit());

        let before = buf.position();
        match buf.skip(skip) {
            Ok(()) => prop_assert_eq!(buf.position(), before + skip),
            Err(_) => prop_assert_eq!(buf.position(), before),
        }
        prop_assert_eq!(buf.position() + buf.remaining(), buf.limit());

        let before = buf.position();
        match buf.slice(slice) {
            Ok(view) => {
                prop_assert_eq!(view.remaining(), slice.unsigned_abs());
                if slice < 0 {
                    prop_assert_eq!(buf.position(), buf.limit() - slice.unsigned_abs());
                } else {
                    prop_assert_eq!(buf.position(), before + slice.unsigned_abs());
                }
            }
            Err(_) => prop_assert_eq!(buf.position(), before),
        }
        prop_assert_eq!(buf.position() + buf.remaining(), buf.limit());
    }

    /// Incremental line reads over arbitrary split points agree with a
    /// one-shot decode.
    #[test]
    fn resumable_line_reads(
        text in "[a-zA-Z0-9 \u{e9}\u{20ac}]{0,40}",
        split in 0usize..200,
    ) {
        init_test_logging();
        let mut full = ByteBuffer::allocate(text.len() * 3 + 4);
        strings::put_modified_utf8(&mut full, &text).unwrap();
        strings::put_modified_utf8(&mut full, "\n").unwrap();
        full.flip();
        let encoded = full.to_vec();

        let cut = split % (encoded.len() + 1);
        let mut out = String::new();
        let mut first = ByteBuffer::from_slice(&encoded[..cut]);
        if strings::read_modified_utf8_line(&mut first, &mut out, '?') {
            prop_assert_eq!(out, format!("{text}\n"));
            return Ok(());
        }
        // Resume with the unconsumed tail plus the rest.
        let mut rest = first.to_vec();
        rest.extend_from_slice(&encoded[cut..]);
        let mut second = ByteBuffer::from_slice(&rest);
        prop_assert!(strings::read_modified_utf8_line(&mut second, &mut out, '?'));
        prop_assert_eq!(out, format!("{text}\n"));
    }
}

#[derive(Default)]
struct Sink {
    messages: Mutex<Vec<Vec<u8>>>,
}

impl MessageHandler for Sink {
    fn handle_message(&self, message: ByteBuffer) {
        self.messages.lock().push(message.to_vec());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any sequence of bounded payloads survives the framed writer/reader
    /// pair byte for byte with boundaries intact.
    #[test]
    fn framing_round_trip(
        payloads in prop::collection::vec(
            prop::collection::vec(any::<u8>(), 0..512),
            0..24,
        )
    ) {
        init_test_logging();
        let options = OptionMap::builder().set(&RECEIVE_BUFFER, 64 * 1024).build();
        let (a, b) = stream_pair(&options);
        let sink = Arc::new(Sink::default());
        let setter = install_message_reader(b, &options);
        setter.set(Some(sink.clone()));
        let writer = FramedMessageWriter::new(a, &options);

        for payload in &payloads {
            prop_assert!(writer.send(&mut ByteBuffer::from_slice(payload)).unwrap());
        }
        prop_assert_eq!(&*sink.messages.lock(), &payloads);
    }
}
