//! BPS variable-length integers.
//!
//! Seven data bits per byte, least significant group first, high bit set on
//! the final byte. Unlike LEB128, every continuation adds one to the remaining
//! value, so each integer has exactly one encoding.

use crate::buffer::ByteBuffer;
use crate::{Error, Result};

/// Longest encoding of a `u64`.
pub const MAX_LEN: usize = 10;

/// -> (value, consumed)
pub fn decode(input: &[u8]) -> Option<(u64, usize)> {
    let mut data: u64 = 0;
    let mut shift: u64 = 1;
    for (idx, x) in input.iter().enumerate().take(MAX_LEN) {
        data = data.checked_add(u64::from(x & 0x7f).checked_mul(shift)?)?;
        if x & 0x80 != 0 {
            return Some((data, idx + 1));
        }
        shift = shift.checked_mul(0x80)?;
        data = data.checked_add(shift)?;
    }
    None
}

pub fn encode(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(value));
    let mut data = value;
    loop {
        let x = (data & 0x7f) as u8;
        data >>= 7;
        if data == 0 {
            out.push(0x80 | x);
            return out;
        }
        out.push(x);
        data -= 1;
    }
}

pub fn encoded_len(value: u64) -> usize {
    let mut data = value;
    let mut len = 1;
    while data >> 7 != 0 {
        data = (data >> 7) - 1;
        len += 1;
    }
    len
}

/// Folds the sign into the low bit: `(abs << 1) | negative`.
pub fn encode_signed(value: i64) -> u64 {
    (value.unsigned_abs() << 1) | u64::from(value < 0)
}

pub fn decode_signed(data: u64) -> i64 {
    let magnitude = (data >> 1) as i64;
    if data & 1 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

pub(crate) fn read(buf: &mut ByteBuffer) -> Result<u64> {
    let start = buf.offset();
    let window = buf.remaining().min(MAX_LEN);
    let (value, consumed) = decode(buf.read_bytes(window)?).ok_or(Error::MalformedPatch)?;
    buf.seek(start + consumed)?;
    Ok(value)
}

pub(crate) fn read_signed(buf: &mut ByteBuffer) -> Result<i64> {
    read(buf).map(decode_signed)
}

pub(crate) fn write(buf: &mut ByteBuffer, value: u64) -> Result<()> {
    buf.write_bytes(&encode(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_encodings() {
        assert_eq!(encode(0), [0x80]);
        assert_eq!(encode(0x7f), [0xff]);
        // 0x80 needs a continuation that already accounts for one extra
        assert_eq!(encode(0x80), [0x00, 0x80]);
        assert_eq!(encode(0x4080), [0x00, 0x00, 0x80]);
        assert_eq!(decode(&[0x00, 0x80]), Some((0x80, 2)));
        assert_eq!(decode(&[0x01, 0x80, 0xaa]), Some((0x81, 2)));
    }

    #[test]
    fn lengths_match_encoding() {
        for value in [0, 1, 0x7f, 0x80, 0x407f, 0x4080, 0x20_4080, u32::MAX as u64, u64::MAX] {
            assert_eq!(encode(value).len(), encoded_len(value), "value {value:#x}");
            assert_eq!(decode(&encode(value)), Some((value, encoded_len(value))));
        }
    }

    #[test]
    fn unterminated_or_overflowing() {
        assert_eq!(decode(&[]), None);
        assert_eq!(decode(&[0x00, 0x7f]), None);
        assert_eq!(decode(&[0x7f; 11]), None);
        assert_eq!(decode(&[0x7f, 0x7f, 0x7f, 0x7f, 0x7f, 0x7f, 0x7f, 0x7f, 0x7f, 0xff]), None);
    }

    #[test]
    fn signed() {
        assert_eq!(encode_signed(0), 0);
        assert_eq!(encode_signed(3), 6);
        assert_eq!(encode_signed(-3), 7);
        for value in [0, 1, -1, 1000, -1000, i64::MAX] {
            assert_eq!(decode_signed(encode_signed(value)), value);
        }
    }

    #[test]
    fn buffer_read_stops_after_terminator() {
        let mut buf = ByteBuffer::from_bytes(vec![0x00, 0x80, 0x85, 0x01]);
        assert_eq!(read(&mut buf).unwrap(), 0x80);
        assert_eq!(read(&mut buf).unwrap(), 5);
        assert_eq!(buf.offset(), 3);
        assert!(matches!(read(&mut buf), Err(Error::MalformedPatch)));
    }
}
