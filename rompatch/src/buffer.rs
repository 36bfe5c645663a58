//! Fixed-size byte buffer with a cursor.
//!
//! Every access is bounds-checked; running off either end yields
//! [`Error::OutOfBounds`] rather than wrapping or truncating.

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
    offset: usize,
    endian: Endian,
}

impl ByteBuffer {
    /// Zero-filled buffer of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self::from_bytes(vec![0; size])
    }

    /// Like [`ByteBuffer::new`], but reports a failed allocation instead of
    /// aborting.
    pub fn try_new(size: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|_| Error::OutputTooLarge(size))?;
        data.resize(size, 0);
        Ok(Self::from_bytes(data))
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            data: bytes.into(),
            offset: 0,
            endian: Endian::default(),
        }
    }

    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_eof(&self) -> bool {
        self.offset >= self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Moves the cursor to `offset`, which may equal the buffer length.
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(self.out_of_bounds(offset, 0));
        }
        self.offset = offset;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        let offset = self.offset.checked_add(n).ok_or(self.out_of_bounds(self.offset, n))?;
        self.seek(offset)
    }

    /// Byte at an absolute position; the cursor is left alone.
    pub fn get(&self, index: usize) -> Result<u8> {
        self.data
            .get(index)
            .copied()
            .ok_or(self.out_of_bounds(index, 1))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_array::<2>()?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(b),
            Endian::Big => u16::from_be_bytes(b),
        })
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        let [a, b, c] = self.read_array::<3>()?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes([a, b, c, 0]),
            Endian::Big => u32::from_be_bytes([0, a, b, c]),
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_array::<4>()?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(b),
            Endian::Big => u32::from_be_bytes(b),
        })
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        let start = self.offset;
        let end = self.checked_end(start, len)?;
        self.offset = end;
        Ok(&self.data[start..end])
    }

    /// Reads a `len`-byte field as ASCII, stopping at the first NUL.
    /// The cursor always advances by the full `len`.
    pub fn read_string(&mut self, len: usize) -> Result<String> {
        let field = self.read_bytes(len)?;
        let text = field.split(|&b| b == 0).next().unwrap_or_default();
        Ok(text.iter().copied().map(char::from).collect())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        match self.endian {
            Endian::Little => self.write_bytes(&value.to_le_bytes()),
            Endian::Big => self.write_bytes(&value.to_be_bytes()),
        }
    }

    /// Writes the low 24 bits of `value`.
    pub fn write_u24(&mut self, value: u32) -> Result<()> {
        match self.endian {
            Endian::Little => self.write_bytes(&value.to_le_bytes()[..3]),
            Endian::Big => self.write_bytes(&value.to_be_bytes()[1..]),
        }
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        match self.endian {
            Endian::Little => self.write_bytes(&value.to_le_bytes()),
            Endian::Big => self.write_bytes(&value.to_be_bytes()),
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let start = self.offset;
        let end = self.checked_end(start, bytes.len())?;
        self.data[start..end].copy_from_slice(bytes);
        self.offset = end;
        Ok(())
    }

    /// Writes `text` into a field of `pad_len` bytes (or exactly `text.len()`
    /// bytes when `pad_len` is `None`), NUL-padding the tail.
    pub fn write_string(&mut self, text: &str, pad_len: Option<usize>) -> Result<()> {
        let len = pad_len.unwrap_or(text.len());
        let start = self.offset;
        let end = self.checked_end(start, len)?;
        let copied = text.len().min(len);
        self.data[start..start + copied].copy_from_slice(&text.as_bytes()[..copied]);
        self.data[start + copied..end].fill(0);
        self.offset = end;
        Ok(())
    }

    /// Independent copy of `len` bytes starting at `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<ByteBuffer> {
        let end = self.checked_end(offset, len)?;
        Ok(ByteBuffer {
            data: self.data[offset..end].to_vec(),
            offset: 0,
            endian: self.endian,
        })
    }

    /// Copies `len` bytes from `self[src_offset..]` into `target[dst_offset..]`.
    /// Neither cursor moves.
    pub fn copy_into(
        &self,
        target: &mut ByteBuffer,
        src_offset: usize,
        len: usize,
        dst_offset: usize,
    ) -> Result<()> {
        let src_end = self.checked_end(src_offset, len)?;
        let dst_end = target.checked_end(dst_offset, len)?;
        target.data[dst_offset..dst_end].copy_from_slice(&self.data[src_offset..src_end]);
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn checked_end(&self, offset: usize, len: usize) -> Result<usize> {
        offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(self.out_of_bounds(offset, len))
    }

    fn out_of_bounds(&self, offset: usize, len: usize) -> Error {
        Error::OutOfBounds {
            offset,
            len,
            size: self.data.len(),
        }
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_respect_endianness() {
        let bytes = [0x01, 0x02, 0x03, 0x04];
        let mut le = ByteBuffer::from_bytes(bytes);
        assert_eq!(le.read_u24().unwrap(), 0x030201);
        le.seek(0).unwrap();
        assert_eq!(le.read_u32().unwrap(), 0x04030201);

        let mut be = ByteBuffer::from_bytes(bytes).with_endian(Endian::Big);
        assert_eq!(be.read_u16().unwrap(), 0x0102);
        assert_eq!(be.read_u16().unwrap(), 0x0304);
        assert!(be.is_eof());
    }

    #[test]
    fn writes_advance_cursor() {
        let mut buf = ByteBuffer::new(6).with_endian(Endian::Big);
        buf.write_u24(0x454f46).unwrap();
        buf.write_u16(0xbeef).unwrap();
        buf.write_u8(7).unwrap();
        assert_eq!(buf.offset(), 6);
        assert_eq!(buf.as_slice(), &[0x45, 0x4f, 0x46, 0xbe, 0xef, 7]);
    }

    #[test]
    fn short_read_is_an_error() {
        let mut buf = ByteBuffer::from_bytes(vec![1, 2, 3]);
        buf.skip(2).unwrap();
        assert!(matches!(
            buf.read_u16(),
            Err(Error::OutOfBounds {
                offset: 2,
                len: 2,
                size: 3
            })
        ));
        // failed reads leave the cursor where it was
        assert_eq!(buf.offset(), 2);
    }

    #[test]
    fn overflowing_write_is_an_error() {
        let mut buf = ByteBuffer::new(3);
        assert!(buf.write_u32(0).is_err());
        assert_eq!(buf.as_slice(), &[0, 0, 0]);
    }

    #[test]
    fn seek_past_end_is_an_error() {
        let mut buf = ByteBuffer::new(4);
        assert!(buf.seek(4).is_ok());
        assert!(buf.seek(5).is_err());
        assert!(buf.skip(1).is_err());
    }

    #[test]
    fn strings() {
        let mut buf = ByteBuffer::new(8);
        buf.write_string("BPS1", Some(6)).unwrap();
        buf.write_string("ab", None).unwrap();
        assert_eq!(buf.as_slice(), b"BPS1\0\0ab");

        buf.seek(0).unwrap();
        assert_eq!(buf.read_string(6).unwrap(), "BPS1");
        assert_eq!(buf.offset(), 6);
    }

    #[test]
    fn slice_and_copy_are_independent() {
        let src = ByteBuffer::from_bytes(vec![1, 2, 3, 4, 5]);
        let mut part = src.slice(1, 3).unwrap();
        part.write_u8(9).unwrap();
        assert_eq!(part.as_slice(), &[9, 3, 4]);
        assert_eq!(src.as_slice(), &[1, 2, 3, 4, 5]);
        assert!(src.slice(4, 2).is_err());

        let mut dst = ByteBuffer::new(4);
        src.copy_into(&mut dst, 3, 2, 1).unwrap();
        assert_eq!(dst.as_slice(), &[0, 4, 5, 0]);
        assert!(src.copy_into(&mut dst, 0, 2, 3).is_err());
        assert!(src.copy_into(&mut dst, 4, 2, 0).is_err());
    }

    #[test]
    fn oversized_allocation_is_an_error() {
        assert_eq!(ByteBuffer::try_new(3).unwrap().as_slice(), &[0, 0, 0]);
        assert!(matches!(
            ByteBuffer::try_new(usize::MAX),
            Err(Error::OutputTooLarge(usize::MAX))
        ));
    }
}
