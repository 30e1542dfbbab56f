//! Incremental string codecs over [`ByteBuffer`].
//!
//! Every reader here is resumable: when the source buffer runs out before
//! the terminator (NUL for z-strings, the delimiter for lines), the reader
//! returns `Ok(false)` / `false` with the buffer positioned so that decoding
//! can continue once more data arrives. A multi-byte sequence that straddles
//! the end of the buffer is un-read: the position is rewound to its lead
//! byte.
//!
//! The modified UTF-8 form is the classical one: a 1-byte form for
//! U+0001..U+007F, a 2-byte form for U+0000 and U+0080..U+07FF, and a 3-byte
//! form for U+0800..U+FFFF. Four-byte forms are never produced; supplementary
//! characters are written as a surrogate pair, each half in the 3-byte form.
//! Malformed lead or continuation bytes decode as the caller-supplied
//! replacement character.

use super::ByteBuffer;
use crate::error::{Error, Result};

/// Decodes a single character from a byte buffer.
///
/// Returns `None` when the buffer exhausts before a complete character; the
/// implementation must leave the position at the start of the incomplete
/// sequence so the read can resume.
pub trait CharDecoder {
    /// Decodes one character, advancing the buffer past its bytes.
    fn decode_char(&self, src: &mut ByteBuffer) -> Option<char>;
}

/// ASCII decoder; bytes above 0x7F decode as the replacement character.
#[derive(Debug, Clone, Copy)]
pub struct AsciiDecoder {
    /// Replacement for invalid bytes.
    pub replacement: char,
}

impl CharDecoder for AsciiDecoder {
    fn decode_char(&self, src: &mut ByteBuffer) -> Option<char> {
        let b = src.get_u8().ok()?;
        Some(if b < 0x80 { b as char } else { self.replacement })
    }
}

/// Latin-1 decoder; every byte maps directly to U+0000..U+00FF.
#[derive(Debug, Clone, Copy)]
pub struct Latin1Decoder;

impl CharDecoder for Latin1Decoder {
    fn decode_char(&self, src: &mut ByteBuffer) -> Option<char> {
        src.get_u8().ok().map(char::from)
    }
}

/// Modified UTF-8 decoder.
#[derive(Debug, Clone, Copy)]
pub struct ModifiedUtf8Decoder {
    /// Replacement for malformed sequences.
    pub replacement: char,
}

/// One decoded UTF-16 code unit, or why there isn't one.
enum Unit {
    Scalar(u16),
    Malformed,
    Underflow,
}

fn decode_unit(src: &mut ByteBuffer) -> Option<Unit> {
    if !src.has_remaining() {
        return None;
    }
    let a = src.get_u8().ok()? as u32;
    if a < 0x80 {
        return Some(Unit::Scalar(a as u16));
    }
    if a < 0xc0 {
        return Some(Unit::Malformed);
    }
    if a < 0xe0 {
        if !src.has_remaining() {
            let _ = src.unget(1);
            return Some(Unit::Underflow);
        }
        let b = src.get_u8().ok()? as u32;
        if b & 0xc0 != 0x80 {
            return Some(Unit::Malformed);
        }
        return Some(Unit::Scalar(((a & 0x1f) << 6 | b & 0x3f) as u16));
    }
    if a < 0xf0 {
        if !src.has_remaining() {
            let _ = src.unget(1);
            return Some(Unit::Underflow);
        }
        let b = src.get_u8().ok()? as u32;
        if b & 0xc0 != 0x80 {
            return Some(Unit::Malformed);
        }
        if !src.has_remaining() {
            let _ = src.unget(2);
            return Some(Unit::Underflow);
        }
        let c = src.get_u8().ok()? as u32;
        if c & 0xc0 != 0x80 {
            return Some(Unit::Malformed);
        }
        return Some(Unit::Scalar(
            ((a & 0x0f) << 12 | (b & 0x3f) << 6 | c & 0x3f) as u16,
        ));
    }
    // 4-byte lead: never produced by the modified form.
    Some(Unit::Malformed)
}

const fn is_high_surrogate(u: u16) -> bool {
    matches!(u, 0xd800..=0xdbff)
}

const fn is_low_surrogate(u: u16) -> bool {
    matches!(u, 0xdc00..=0xdfff)
}

impl CharDecoder for ModifiedUtf8Decoder {
    fn decode_char(&self, src: &mut ByteBuffer) -> Option<char> {
        let unit = match decode_unit(src)? {
            Unit::Underflow => return None,
            Unit::Malformed => return Some(self.replacement),
            Unit::Scalar(u) => u,
        };
        if is_low_surrogate(unit) {
            // Unpaired low half.
            return Some(self.replacement);
        }
        if is_high_surrogate(unit) {
            let resume = src.position();
            return match decode_unit(src) {
                // High surrogates always occupy the 3-byte form, so the
                // straddling rewind covers it exactly.
                None | Some(Unit::Underflow) => {
                    let _ = src.unget(3);
                    None
                }
                Some(Unit::Malformed) => Some(self.replacement),
                Some(Unit::Scalar(low)) if is_low_surrogate(low) => {
                    let cp = 0x10000
                        + ((u32::from(unit) - 0xd800) << 10)
                        + (u32::from(low) - 0xdc00);
                    Some(char::from_u32(cp).unwrap_or(self.replacement))
                }
                Some(Unit::Scalar(_)) => {
                    // Unpaired high half; leave the following unit for the
                    // next call.
                    src.set_position(resume);
                    Some(self.replacement)
                }
            };
        }
        Some(char::from_u32(u32::from(unit)).unwrap_or(self.replacement))
    }
}

/// Reads characters up to (and including) `delimiter` into `out`.
///
/// Returns `false` when the buffer exhausts before the delimiter; the buffer
/// stays positioned for resumption.
pub fn read_line<D: CharDecoder>(
    src: &mut ByteBuffer,
    out: &mut String,
    decoder: &D,
    delimiter: char,
) -> bool {
    loop {
        if !src.has_remaining() {
            return false;
        }
        match decoder.decode_char(src) {
            None => return false,
            Some(c) => {
                out.push(c);
                if c == delimiter {
                    return true;
                }
            }
        }
    }
}

/// Reads characters up to a NUL terminator into `out`.
///
/// The terminating raw `0x00` byte is consumed and not appended. Returns
/// `false` when the buffer exhausts before the terminator.
pub fn read_z<D: CharDecoder>(src: &mut ByteBuffer, out: &mut String, decoder: &D) -> bool {
    loop {
        if !src.has_remaining() {
            return false;
        }
        if src.get_at(src.position()) == Some(0) {
            let _ = src.skip(1);
            return true;
        }
        match decoder.decode_char(src) {
            None => return false,
            Some(c) => out.push(c),
        }
    }
}

/// Reads a NUL-terminated ASCII string.
pub fn read_ascii_z(src: &mut ByteBuffer, out: &mut String, replacement: char) -> bool {
    read_z(src, out, &AsciiDecoder { replacement })
}

/// Reads one `\n`-terminated line of ASCII text; the delimiter is included.
pub fn read_ascii_line(src: &mut ByteBuffer, out: &mut String, replacement: char) -> bool {
    read_line(src, out, &AsciiDecoder { replacement }, '\n')
}

/// Reads the remainder of the buffer as ASCII text.
pub fn read_ascii(src: &mut ByteBuffer, out: &mut String, replacement: char) {
    while let Ok(b) = src.get_u8() {
        out.push(if b < 0x80 { b as char } else { replacement });
    }
}

/// Reads up to `limit` characters of ASCII text.
pub fn read_ascii_limit(src: &mut ByteBuffer, out: &mut String, limit: usize, replacement: char) {
    for _ in 0..limit {
        match src.get_u8() {
            Ok(b) => out.push(if b < 0x80 { b as char } else { replacement }),
            Err(_) => return,
        }
    }
}

/// Reads a NUL-terminated Latin-1 string.
pub fn read_latin1_z(src: &mut ByteBuffer, out: &mut String) -> bool {
    read_z(src, out, &Latin1Decoder)
}

/// Reads one `\n`-terminated line of Latin-1 text; the delimiter is included.
pub fn read_latin1_line(src: &mut ByteBuffer, out: &mut String) -> bool {
    read_line(src, out, &Latin1Decoder, '\n')
}

/// Reads the remainder of the buffer as Latin-1 text.
pub fn read_latin1(src: &mut ByteBuffer, out: &mut String) {
    while let Ok(b) = src.get_u8() {
        out.push(char::from(b));
    }
}

/// Reads a NUL-terminated modified-UTF-8 string.
///
/// A raw `0x00` byte terminates; the two-byte encoding `C0 80` decodes as an
/// embedded NUL character instead.
pub fn read_modified_utf8_z(src: &mut ByteBuffer, out: &mut String, replacement: char) -> bool {
    read_z(src, out, &ModifiedUtf8Decoder { replacement })
}

/// Reads one line of modified-UTF-8 text; the delimiter is included.
pub fn read_modified_utf8_line(
    src: &mut ByteBuffer,
    out: &mut String,
    replacement: char,
) -> bool {
    read_line(src, out, &ModifiedUtf8Decoder { replacement }, '\n')
}

/// Decodes the whole remainder of the buffer as modified UTF-8.
///
/// # Errors
///
/// Fails with *buffer-underflow* when the buffer ends in the middle of a
/// multi-byte sequence.
pub fn read_modified_utf8(
    src: &mut ByteBuffer,
    out: &mut String,
    replacement: char,
) -> Result<()> {
    let decoder = ModifiedUtf8Decoder { replacement };
    while src.has_remaining() {
        match decoder.decode_char(src) {
            Some(c) => out.push(c),
            None => return Err(Error::buffer_underflow()),
        }
    }
    Ok(())
}

fn put_unit(dst: &mut ByteBuffer, unit: u16) -> Result<()> {
    let u = u32::from(unit);
    if u > 0 && u <= 0x7f {
        dst.put_u8(u as u8)
    } else if u <= 0x7ff {
        dst.put_u8((0xc0 | 0x1f & u >> 6) as u8)?;
        dst.put_u8((0x80 | 0x3f & u) as u8)
    } else {
        dst.put_u8((0xe0 | 0x0f & u >> 12) as u8)?;
        dst.put_u8((0x80 | 0x3f & u >> 6) as u8)?;
        dst.put_u8((0x80 | 0x3f & u) as u8)
    }
}

/// Encodes `text` into the buffer using modified UTF-8.
///
/// NUL encodes as the two-byte form `C0 80`; supplementary characters as a
/// surrogate pair of 3-byte sequences.
///
/// # Errors
///
/// Fails with *buffer-overflow* when the buffer cannot hold the complete
/// encoding.
pub fn put_modified_utf8(dst: &mut ByteBuffer, text: &str) -> Result<()> {
    for c in text.chars() {
        let cp = c as u32;
        if cp >= 0x10000 {
            let v = cp - 0x10000;
            put_unit(dst, (0xd800 + (v >> 10)) as u16)?;
            put_unit(dst, (0xdc00 + (v & 0x3ff)) as u16)?;
        } else {
            put_unit(dst, cp as u16)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(s: &str) -> String {
        let mut buf = ByteBuffer::allocate(s.len() * 3 + 16);
        put_modified_utf8(&mut buf, s).unwrap();
        buf.flip();
        let mut out = String::new();
        read_modified_utf8(&mut buf, &mut out, '?').unwrap();
        out
    }

    #[test]
    fn mutf8_round_trip_bmp() {
        for s in ["", "hello", "héllo wörld", "\u{7ff}\u{800}\u{ffff}", "日本語"] {
            assert_eq!(round_trip(s), s);
        }
    }

    #[test]
    fn mutf8_nul_uses_two_byte_form() {
        let mut buf = ByteBuffer::allocate(8);
        put_modified_utf8(&mut buf, "a\0b").unwrap();
        buf.flip();
        assert_eq!(buf.bytes(), &[b'a', 0xc0, 0x80, b'b']);
    }

    #[test]
    fn mutf8_supplementary_as_surrogate_pair() {
        let s = "a\u{1f600}b";
        let mut buf = ByteBuffer::allocate(16);
        put_modified_utf8(&mut buf, s).unwrap();
        buf.flip();
        // 1 + 3 + 3 + 1: each surrogate half takes the 3-byte form.
        assert_eq!(buf.remaining(), 8);
        assert_eq!(round_trip(s), s);
    }

    #[test]
    fn z_string_terminates_on_raw_nul() {
        let mut buf = ByteBuffer::from_slice(&[b'h', b'i', 0xc0, 0x80, b'!', 0x00, b'x']);
        let mut out = String::new();
        assert!(read_modified_utf8_z(&mut buf, &mut out, '?'));
        assert_eq!(out, "hi\0!");
        assert_eq!(buf.bytes(), b"x");
    }

    #[test]
    fn straddling_sequence_is_unread() {
        // 3-byte sequence for U+20AC, cut after two bytes.
        let mut buf = ByteBuffer::from_slice(&[b'a', 0xe2, 0x82]);
        let mut out = String::new();
        assert!(!read_modified_utf8_line(&mut buf, &mut out, '?'));
        assert_eq!(out, "a");
        // Position rewound to the lead byte of the incomplete sequence.
        assert_eq!(buf.position(), 1);

        // Supply the rest and resume.
        let mut rest = ByteBuffer::from_slice(&[0xe2, 0x82, 0xac, b'\n']);
        assert!(read_modified_utf8_line(&mut rest, &mut out, '?'));
        assert_eq!(out, "a\u{20ac}\n");
    }

    #[test]
    fn malformed_bytes_become_replacement() {
        let mut buf = ByteBuffer::from_slice(&[0x80, b'k', b'\n']);
        let mut out = String::new();
        assert!(read_modified_utf8_line(&mut buf, &mut out, '?'));
        assert_eq!(out, "?k\n");
    }

    #[test]
    fn ascii_line_replaces_high_bytes() {
        let mut buf = ByteBuffer::from_slice(&[b'o', 0xff, b'k', b'\n', b'z']);
        let mut out = String::new();
        assert!(read_ascii_line(&mut buf, &mut out, '?'));
        assert_eq!(out, "o?k\n");
        assert_eq!(buf.bytes(), b"z");
    }

    #[test]
    fn ascii_line_needs_more_data() {
        let mut buf = ByteBuffer::from_slice(b"partial");
        let mut out = String::new();
        assert!(!read_ascii_line(&mut buf, &mut out, '?'));
        assert_eq!(out, "partial");
        assert!(!buf.has_remaining());
    }

    #[test]
    fn latin1_maps_all_bytes() {
        let mut buf = ByteBuffer::from_slice(&[0xe9, 0x00]);
        let mut out = String::new();
        assert!(read_latin1_z(&mut buf, &mut out));
        assert_eq!(out, "é");
    }

    #[test]
    fn generic_read_line_with_custom_delimiter() {
        let mut buf = ByteBuffer::from_slice(b"key;rest");
        let mut out = String::new();
        assert!(read_line(&mut buf, &mut out, &Latin1Decoder, ';'));
        assert_eq!(out, "key;");
        assert_eq!(buf.bytes(), b"rest");
    }
}
