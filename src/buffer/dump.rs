//! Hex dumper for byte buffers.

use super::ByteBuffer;
use std::fmt::{self, Write};

/// Dumps the remaining bytes of `buffer` to `dest` as rows of hex columns
/// with a printable-text gutter.
///
/// Each row shows `columns` groups of eight bytes, prefixed by the row
/// offset in hex and indented by `indent` spaces. The buffer itself is not
/// modified.
///
/// # Errors
///
/// Propagates formatting errors from `dest`.
pub fn dump(
    buffer: &ByteBuffer,
    dest: &mut dyn Write,
    indent: usize,
    columns: usize,
) -> fmt::Result {
    let pos = buffer.position();
    let remaining = buffer.remaining();
    let row_length = 8 * columns.max(1);
    let offset_width = format!("{remaining:x}").len().max(4);
    let mut idx = 0;
    while idx < remaining {
        for _ in 0..indent {
            dest.write_char(' ')?;
        }
        write!(dest, "{idx:0offset_width$x} - ")?;
        append_hex_row(buffer, dest, pos + idx, columns)?;
        append_text_row(buffer, dest, pos + idx, columns)?;
        dest.write_char('\n')?;
        idx += row_length;
    }
    Ok(())
}

fn append_hex_row(
    buffer: &ByteBuffer,
    dest: &mut dyn Write,
    start: usize,
    columns: usize,
) -> fmt::Result {
    let limit = buffer.limit();
    let mut pos = start;
    for _ in 0..columns.max(1) {
        for _ in 0..8 {
            if pos >= limit {
                dest.write_str("  ")?;
            } else {
                let v = buffer.get_at(pos).unwrap_or(0);
                pos += 1;
                write!(dest, "{v:02x}")?;
            }
            dest.write_char(' ')?;
        }
        dest.write_str("  ")?;
    }
    Ok(())
}

fn append_text_row(
    buffer: &ByteBuffer,
    dest: &mut dyn Write,
    start: usize,
    columns: usize,
) -> fmt::Result {
    let limit = buffer.limit();
    let mut pos = start;
    dest.write_str("[ ")?;
    for _ in 0..columns.max(1) {
        for _ in 0..8 {
            if pos >= limit {
                dest.write_char(' ')?;
            } else {
                let v = buffer.get_at(pos).unwrap_or(0) as char;
                pos += 1;
                dest.write_char(if v.is_ascii_graphic() || v == ' ' {
                    v
                } else {
                    '.'
                })?;
            }
        }
        dest.write_char(' ')?;
    }
    dest.write_char(']')
}

/// Lazy [`fmt::Display`] wrapper around [`dump`].
///
/// Useful for logging: the dump is only rendered if the value is actually
/// formatted.
///
/// ```
/// use evio::buffer::{ByteBuffer, Dumper};
///
/// let buf = ByteBuffer::from_slice(b"hello");
/// let text = format!("{}", Dumper::new(&buf, 0, 1));
/// assert!(text.contains("68 65 6c 6c 6f"));
/// ```
#[derive(Debug)]
pub struct Dumper<'a> {
    buffer: &'a ByteBuffer,
    indent: usize,
    columns: usize,
}

impl<'a> Dumper<'a> {
    /// Creates a dumper over the remaining bytes of `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a ByteBuffer, indent: usize, columns: usize) -> Self {
        Self {
            buffer,
            indent,
            columns,
        }
    }
}

impl fmt::Display for Dumper<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dump(self.buffer, f, self.indent, self.columns)
    }
}
