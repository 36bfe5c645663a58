//! IPS patches.
//!
//! `"PATCH"`, then records of a 24-bit big-endian offset and a 16-bit length
//! followed by that many bytes. A zero length marks an RLE record carrying a
//! 16-bit count and the fill byte. `"EOF"` ends the list, optionally followed
//! by a 24-bit size to truncate (or extend) the output to.

use std::fmt;

use crate::buffer::{ByteBuffer, Endian};
use crate::{Error, Result};

pub(crate) const MAGIC: &str = "PATCH";
const EOF: u32 = 0x454f46;
/// First offset a 24-bit field cannot address.
pub const MAX_SIZE: usize = 0x100_0000;
const MAX_RECORD_LEN: usize = 0xffff;
/// Edits closer than this to the previous simple record are folded into it.
const MERGE_DISTANCE: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Simple { offset: u32, data: Vec<u8> },
    Rle { offset: u32, length: u16, byte: u8 },
}

impl Record {
    pub fn offset(&self) -> usize {
        match self {
            Record::Simple { offset, .. } | Record::Rle { offset, .. } => *offset as usize,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Record::Simple { data, .. } => data.len(),
            Record::Rle { length, .. } => usize::from(*length),
        }
    }

    pub fn end(&self) -> usize {
        self.offset() + self.len()
    }

    fn encoded_len(&self) -> usize {
        match self {
            // offset, 0x0000, count, fill byte
            Record::Rle { .. } => 3 + 2 + 2 + 1,
            Record::Simple { data, .. } => 3 + 2 + data.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IpsPatch {
    pub records: Vec<Record>,
    pub truncate: Option<u32>,
}

impl IpsPatch {
    pub fn parse(patch: &[u8]) -> Result<Self> {
        let mut buf = ByteBuffer::from_bytes(patch).with_endian(Endian::Big);
        if buf.len() < MAGIC.len() || buf.read_string(MAGIC.len())? != MAGIC {
            return Err(Error::MissingHeader(MAGIC));
        }

        let patch = Self::parse_records(&mut buf).map_err(|e| match e {
            Error::OutOfBounds { .. } => Error::MalformedPatch,
            e => e,
        })?;
        log::debug!("parsed IPS patch: {} records", patch.records.len());
        Ok(patch)
    }

    fn parse_records(buf: &mut ByteBuffer) -> Result<Self> {
        let mut patch = IpsPatch::default();
        loop {
            let offset = buf.read_u24()?;
            if offset == EOF {
                match buf.remaining() {
                    0 => return Ok(patch),
                    3 => {
                        patch.truncate = Some(buf.read_u24()?);
                        return Ok(patch);
                    }
                    // otherwise 0x454f46 is an ordinary record offset
                    _ => {}
                }
            }

            match buf.read_u16()? {
                0 => {
                    let length = buf.read_u16()?;
                    let byte = buf.read_u8()?;
                    patch.add_rle_record(offset, length, byte);
                }
                length => {
                    let data = buf.read_bytes(usize::from(length))?.to_vec();
                    patch.add_simple_record(offset, data);
                }
            }
        }
    }

    pub fn add_simple_record(&mut self, offset: u32, data: Vec<u8>) {
        self.records.push(Record::Simple { offset, data });
    }

    pub fn add_rle_record(&mut self, offset: u32, length: u16, byte: u8) {
        self.records.push(Record::Rle {
            offset,
            length,
            byte,
        });
    }

    pub fn encoded_len(&self) -> usize {
        MAGIC.len()
            + self.records.iter().map(Record::encoded_len).sum::<usize>()
            + 3
            + if self.truncate.is_some() { 3 } else { 0 }
    }

    pub fn export(&self) -> Result<Vec<u8>> {
        let mut buf = ByteBuffer::new(self.encoded_len()).with_endian(Endian::Big);
        buf.write_string(MAGIC, None)?;
        for record in &self.records {
            if record.offset() >= MAX_SIZE {
                return Err(Error::FormatLimitExceeded(record.offset()));
            }
            buf.write_u24(record.offset() as u32)?;
            match record {
                Record::Rle { length, byte, .. } => {
                    buf.write_u16(0)?;
                    buf.write_u16(*length)?;
                    buf.write_u8(*byte)?;
                }
                Record::Simple { data, .. } => {
                    // a zero length would read back as RLE
                    let length = u16::try_from(data.len())
                        .ok()
                        .filter(|&len| len != 0)
                        .ok_or(Error::MalformedPatch)?;
                    buf.write_u16(length)?;
                    buf.write_bytes(data)?;
                }
            }
        }

        buf.write_string("EOF", None)?;
        if let Some(truncate) = self.truncate {
            if truncate as usize >= MAX_SIZE {
                return Err(Error::FormatLimitExceeded(truncate as usize));
            }
            buf.write_u24(truncate)?;
        }

        Ok(buf.into_inner())
    }

    /// Size of the patched output for a source of `source_len` bytes.
    pub fn target_len(&self, source_len: usize) -> usize {
        match self.truncate {
            Some(truncate) => truncate as usize,
            None => self
                .records
                .iter()
                .map(Record::end)
                .fold(source_len, usize::max),
        }
    }

    /// Writes every record over a copy of `source`, in order, so later records
    /// win where they overlap.
    pub fn apply(&self, source: &[u8]) -> Result<Vec<u8>> {
        let rom = ByteBuffer::from_bytes(source);
        let size = self.target_len(rom.len());

        let mut target = if size == rom.len() {
            rom
        } else if size < rom.len() {
            rom.slice(0, size)?
        } else {
            let mut expanded = ByteBuffer::new(size);
            rom.copy_into(&mut expanded, 0, rom.len(), 0)?;
            expanded
        };

        for record in &self.records {
            target.seek(record.offset())?;
            match record {
                Record::Rle { length, byte, .. } => {
                    for _ in 0..*length {
                        target.write_u8(*byte)?;
                    }
                }
                Record::Simple { data, .. } => target.write_bytes(data)?,
            }
        }

        Ok(target.into_inner())
    }

    /// Records every byte where `modified` differs from `original`, reading
    /// past the end of `original` as zeros.
    pub fn create(original: &[u8], modified: &[u8]) -> Result<Self> {
        let mut patch = IpsPatch::default();
        if modified.len() < original.len() {
            if modified.len() >= MAX_SIZE {
                return Err(Error::FormatLimitExceeded(modified.len()));
            }
            patch.truncate = Some(modified.len() as u32);
        }

        let original_at = |pos: usize| original.get(pos).copied().unwrap_or(0);
        // index of the last record, while it may still absorb nearby edits
        let mut previous: Option<usize> = None;
        let mut pos = 0;
        while pos < modified.len() {
            let mut b1 = original_at(pos);
            let mut b2 = modified[pos];
            pos += 1;
            if b1 == b2 {
                continue;
            }

            let start = pos - 1;
            let mut rle = true;
            let mut data = Vec::new();
            while b1 != b2 && data.len() < MAX_RECORD_LEN {
                data.push(b2);
                if b2 != data[0] {
                    rle = false;
                }
                if pos == modified.len() || data.len() == MAX_RECORD_LEN {
                    break;
                }
                b1 = original_at(pos);
                b2 = modified[pos];
                pos += 1;
            }

            let mergeable = previous
                .map(|index| (index, &patch.records[index]))
                .filter(|(_, record)| matches!(record, Record::Simple { .. }))
                .and_then(|(index, record)| {
                    let distance = start - record.end();
                    (distance < MERGE_DISTANCE
                        && record.len() + distance + data.len() < MAX_RECORD_LEN)
                        .then_some((index, record.end()))
                });

            if let Some((index, end)) = mergeable {
                if rle && data.len() > MERGE_DISTANCE {
                    // rescan this run on its own so it can become an RLE record
                    pos = start;
                    previous = None;
                } else if let Record::Simple { data: merged, .. } = &mut patch.records[index] {
                    merged.extend_from_slice(&modified[end..start]);
                    merged.extend_from_slice(&data);
                }
                continue;
            }

            if start >= MAX_SIZE {
                return Err(Error::FormatLimitExceeded(start));
            }
            if rle && data.len() > 2 {
                patch.add_rle_record(start as u32, data.len() as u16, data[0]);
            } else {
                patch.add_simple_record(start as u32, data);
            }
            previous = Some(patch.records.len() - 1);
        }

        if modified.len() > original.len() {
            let last_end = patch.records.last().map_or(0, Record::end);
            if last_end < modified.len() {
                let offset = modified.len() - 1;
                if offset >= MAX_SIZE {
                    return Err(Error::FormatLimitExceeded(offset));
                }
                patch.add_simple_record(offset as u32, vec![0]);
            }
        }

        log::debug!(
            "generated {} IPS records for {} -> {} bytes",
            patch.records.len(),
            original.len(),
            modified.len()
        );
        Ok(patch)
    }
}

impl fmt::Display for IpsPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rle = self
            .records
            .iter()
            .filter(|record| matches!(record, Record::Rle { .. }))
            .count();
        writeln!(f, "Simple records: {}", self.records.len() - rle)?;
        writeln!(f, "RLE records: {rle}")?;
        write!(f, "Total records: {}", self.records.len())?;
        if let Some(truncate) = self.truncate {
            write!(f, "\nTruncate at: {truncate:#x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn round_trip(original: &[u8], modified: &[u8]) -> IpsPatch {
        let patch = IpsPatch::create(original, modified).unwrap();
        let bytes = patch.export().unwrap();
        let parsed = IpsPatch::parse(&bytes).unwrap();
        assert_eq!(parsed, patch);
        assert_eq!(parsed.apply(original).unwrap(), modified.to_vec());
        patch
    }

    #[test]
    fn simple_record() {
        let patch = IpsPatch::parse(b"PATCH\x00\x00\x05\x00\x02\xaa\xbbEOF").unwrap();
        let mut expected = vec![0; 10];
        expected[5..7].copy_from_slice(&[0xaa, 0xbb]);
        assert_eq!(patch.apply(&[0; 10]).unwrap(), expected);
    }

    #[test]
    fn rle_record_and_growth() {
        let patch = IpsPatch::parse(b"PATCH\x00\x00\x02\x00\x00\x00\x04\x7fEOF").unwrap();
        assert_eq!(
            patch.records,
            [Record::Rle {
                offset: 2,
                length: 4,
                byte: 0x7f
            }]
        );
        assert_eq!(patch.apply(&[1, 2, 3]).unwrap(), [1, 2, 0x7f, 0x7f, 0x7f, 0x7f]);
    }

    #[test]
    fn truncate_and_extend() {
        let source: Vec<u8> = (1..=10).collect();
        let truncate = IpsPatch::parse(b"PATCHEOF\x00\x00\x05").unwrap();
        assert_eq!(truncate.truncate, Some(5));
        assert_eq!(truncate.apply(&source).unwrap(), &source[..5]);

        let extend = IpsPatch::parse(b"PATCHEOF\x00\x00\x0c").unwrap();
        let mut expected = source.clone();
        expected.extend_from_slice(&[0, 0]);
        assert_eq!(extend.apply(&source).unwrap(), expected);
    }

    #[test]
    fn later_records_win() {
        let mut patch = IpsPatch::default();
        patch.add_simple_record(1, vec![1, 1, 1, 1]);
        patch.add_rle_record(3, 3, 2);
        patch.add_simple_record(0, vec![3, 3]);
        let bytes = patch.export().unwrap();
        let patch = IpsPatch::parse(&bytes).unwrap();
        assert_eq!(patch.apply(&[0; 8]).unwrap(), [3, 3, 1, 2, 2, 2, 0, 0]);
    }

    #[test]
    fn eof_offset_can_be_a_record() {
        let patch = IpsPatch::parse(b"PATCHEOF\x00\x01\x09EOF").unwrap();
        assert_eq!(
            patch.records,
            [Record::Simple {
                offset: EOF,
                data: vec![9]
            }]
        );
    }

    #[test]
    fn malformed_patches() {
        assert!(matches!(
            IpsPatch::parse(b"PACTH\x00\x00\x00EOF"),
            Err(Error::MissingHeader("PATCH"))
        ));
        assert!(matches!(IpsPatch::parse(b"PAT"), Err(Error::MissingHeader(_))));
        // no EOF marker
        assert!(matches!(
            IpsPatch::parse(b"PATCH\x00\x00\x05\x00\x02\xaa\xbb"),
            Err(Error::MalformedPatch)
        ));
        // record runs past the end
        assert!(matches!(
            IpsPatch::parse(b"PATCH\x00\x00\x05\x00\x09\xaaEOF"),
            Err(Error::MalformedPatch)
        ));
    }

    #[test]
    fn create_merges_nearby_edits() {
        let original = [0u8; 32];
        let mut modified = original;
        modified[4] = 1;
        modified[8] = 2;
        modified[20] = 3;
        let patch = round_trip(&original, &modified);
        assert_eq!(
            patch.records,
            [
                Record::Simple {
                    offset: 4,
                    data: vec![1, 0, 0, 0, 2]
                },
                Record::Simple {
                    offset: 20,
                    data: vec![3]
                },
            ]
        );
    }

    #[test]
    fn create_splits_out_runs() {
        let original = [0u8; 32];
        let mut modified = original;
        modified[2] = 1;
        modified[4..14].fill(9);
        let patch = round_trip(&original, &modified);
        assert_eq!(
            patch.records,
            [
                Record::Simple {
                    offset: 2,
                    data: vec![1]
                },
                Record::Rle {
                    offset: 4,
                    length: 10,
                    byte: 9
                },
            ]
        );
    }

    #[test]
    fn create_resizes() {
        let original: Vec<u8> = (0..64).collect();

        let shorter = round_trip(&original, &original[..40]);
        assert_eq!(shorter.truncate, Some(40));
        assert!(shorter.records.is_empty());

        let mut longer = original.clone();
        longer.extend_from_slice(&[0; 5]);
        let patch = round_trip(&original, &longer);
        assert_eq!(
            patch.records,
            [Record::Simple {
                offset: 68,
                data: vec![0]
            }]
        );
    }

    #[test]
    fn create_rejects_far_offsets() {
        let original = vec![0; MAX_SIZE + 1];
        let mut modified = original.clone();
        modified[MAX_SIZE] = 1;
        assert!(matches!(
            IpsPatch::create(&original, &modified),
            Err(Error::FormatLimitExceeded(MAX_SIZE))
        ));
    }

    #[test]
    fn summary() {
        let patch = IpsPatch {
            records: vec![
                Record::Simple {
                    offset: 0,
                    data: vec![1],
                },
                Record::Rle {
                    offset: 4,
                    length: 3,
                    byte: 0,
                },
            ],
            truncate: Some(0x20),
        };
        assert_eq!(
            patch.to_string(),
            "Simple records: 1\nRLE records: 1\nTotal records: 2\nTruncate at: 0x20"
        );
    }
}
