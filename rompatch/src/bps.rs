//! BPS patches: parsing, serialization and application.
//!
//! Layout: `"BPS1"`, source size, target size, metadata length and metadata,
//! a stream of actions, then little-endian CRC32s of the source, the target
//! and the patch itself (minus those last four bytes).

use std::fmt;

use crate::buffer::{ByteBuffer, Endian};
use crate::checksum::{crc32, verify_crc};
use crate::{vlv, CrcKind, Error, Options, Result};

mod diff;

pub use diff::BpsMode;

pub(crate) const MAGIC: &str = "BPS1";
const FOOTER_LEN: usize = 12;

const SOURCE_READ: u64 = 0;
const TARGET_READ: u64 = 1;
const SOURCE_COPY: u64 = 2;
const TARGET_COPY: u64 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Copy from the source at the current output position.
    SourceRead { length: usize },
    /// Emit literal bytes carried in the patch.
    TargetRead { bytes: Vec<u8> },
    /// Copy from the source, moving the source cursor by `relative_offset` first.
    SourceCopy { length: usize, relative_offset: i64 },
    /// Copy from the output written so far, moving the target cursor by
    /// `relative_offset` first.
    TargetCopy { length: usize, relative_offset: i64 },
}

impl Action {
    /// Number of output bytes this action produces.
    pub fn len(&self) -> usize {
        match self {
            Action::SourceRead { length }
            | Action::SourceCopy { length, .. }
            | Action::TargetCopy { length, .. } => *length,
            Action::TargetRead { bytes } => bytes.len(),
        }
    }

    fn tag(&self) -> u64 {
        let kind = match self {
            Action::SourceRead { .. } => SOURCE_READ,
            Action::TargetRead { .. } => TARGET_READ,
            Action::SourceCopy { .. } => SOURCE_COPY,
            Action::TargetCopy { .. } => TARGET_COPY,
        };
        ((self.len() as u64).saturating_sub(1) << 2) | kind
    }

    fn encoded_len(&self) -> usize {
        let payload = match self {
            Action::SourceRead { .. } => 0,
            Action::TargetRead { bytes } => bytes.len(),
            Action::SourceCopy {
                relative_offset, ..
            }
            | Action::TargetCopy {
                relative_offset, ..
            } => vlv::encoded_len(vlv::encode_signed(*relative_offset)),
        };
        vlv::encoded_len(self.tag()) + payload
    }

    fn read(buf: &mut ByteBuffer) -> Result<Self> {
        let data = vlv::read(buf)?;
        let length = usize::try_from((data >> 2) + 1).map_err(|_| Error::MalformedPatch)?;
        Ok(match data & 3 {
            SOURCE_READ => Action::SourceRead { length },
            TARGET_READ => Action::TargetRead {
                bytes: buf.read_bytes(length)?.to_vec(),
            },
            SOURCE_COPY => Action::SourceCopy {
                length,
                relative_offset: vlv::read_signed(buf)?,
            },
            _ => Action::TargetCopy {
                length,
                relative_offset: vlv::read_signed(buf)?,
            },
        })
    }

    fn write(&self, buf: &mut ByteBuffer) -> Result<()> {
        vlv::write(buf, self.tag())?;
        match self {
            Action::SourceRead { .. } => Ok(()),
            Action::TargetRead { bytes } => buf.write_bytes(bytes),
            Action::SourceCopy {
                relative_offset, ..
            }
            | Action::TargetCopy {
                relative_offset, ..
            } => vlv::write(buf, vlv::encode_signed(*relative_offset)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BpsPatch {
    pub source_size: u64,
    pub target_size: u64,
    pub metadata: Vec<u8>,
    pub actions: Vec<Action>,
    pub source_crc: u32,
    pub target_crc: u32,
    pub patch_crc: u32,
}

impl BpsPatch {
    /// Parses and self-checks a patch. The patch checksum is always verified.
    pub fn parse(patch: &[u8]) -> Result<Self> {
        let Some(footer_start) = patch.len().checked_sub(FOOTER_LEN) else {
            return Err(if patch.starts_with(MAGIC.as_bytes()) {
                Error::MalformedPatch
            } else {
                Error::MissingHeader(MAGIC)
            });
        };

        let mut body = ByteBuffer::from_bytes(&patch[..footer_start]);
        if body.len() < MAGIC.len() || body.read_string(MAGIC.len())? != MAGIC {
            return Err(Error::MissingHeader(MAGIC));
        }

        let mut footer = ByteBuffer::from_bytes(&patch[footer_start..]).with_endian(Endian::Little);
        let source_crc = footer.read_u32()?;
        let target_crc = footer.read_u32()?;
        let patch_crc = footer.read_u32()?;

        verify_crc(&patch[..patch.len() - 4], patch_crc)
            .map_err(|_| Error::CrcMismatch(CrcKind::Patch))?;

        let parsed = Self::parse_body(&mut body).map_err(|e| match e {
            Error::OutOfBounds { .. } => Error::MalformedPatch,
            e => e,
        })?;

        let patch = BpsPatch {
            source_crc,
            target_crc,
            patch_crc,
            ..parsed
        };
        log::debug!(
            "parsed BPS patch: {} actions, {} -> {} bytes",
            patch.actions.len(),
            patch.source_size,
            patch.target_size
        );
        Ok(patch)
    }

    fn parse_body(body: &mut ByteBuffer) -> Result<Self> {
        let source_size = vlv::read(body)?;
        let target_size = vlv::read(body)?;
        let metadata_len = usize::try_from(vlv::read(body)?).map_err(|_| Error::MalformedPatch)?;
        let metadata = body.read_bytes(metadata_len)?.to_vec();

        let mut actions = Vec::new();
        while !body.is_eof() {
            actions.push(Action::read(body)?);
        }

        let patch = BpsPatch {
            source_size,
            target_size,
            metadata,
            actions,
            ..Default::default()
        };
        patch.check_sizes()?;
        Ok(patch)
    }

    /// Both sizes fit in 32 bits and the actions produce exactly
    /// `target_size` bytes.
    fn check_sizes(&self) -> Result<()> {
        let limit = u64::from(u32::MAX);
        if self.source_size > limit || self.target_size > limit {
            return Err(Error::MalformedPatch);
        }
        let output_len = self
            .actions
            .iter()
            .try_fold(0u64, |sum, action| sum.checked_add(action.len() as u64));
        if output_len != Some(self.target_size) {
            return Err(Error::MalformedPatch);
        }
        Ok(())
    }

    /// Size in bytes of the serialized patch.
    pub fn encoded_len(&self) -> usize {
        MAGIC.len()
            + vlv::encoded_len(self.source_size)
            + vlv::encoded_len(self.target_size)
            + vlv::encoded_len(self.metadata.len() as u64)
            + self.metadata.len()
            + self.actions.iter().map(Action::encoded_len).sum::<usize>()
            + FOOTER_LEN
    }

    /// Serializes the patch. The trailing patch checksum is computed over the
    /// bytes written, not taken from `patch_crc`.
    pub fn export(&self) -> Result<Vec<u8>> {
        if self.actions.iter().any(|action| action.len() == 0) {
            return Err(Error::MalformedPatch);
        }

        let mut buf = ByteBuffer::new(self.encoded_len()).with_endian(Endian::Little);
        buf.write_string(MAGIC, None)?;
        vlv::write(&mut buf, self.source_size)?;
        vlv::write(&mut buf, self.target_size)?;
        vlv::write(&mut buf, self.metadata.len() as u64)?;
        buf.write_bytes(&self.metadata)?;
        for action in &self.actions {
            action.write(&mut buf)?;
        }
        buf.write_u32(self.source_crc)?;
        buf.write_u32(self.target_crc)?;

        let patch_crc = crc32(&buf.as_slice()[..buf.offset()]);
        buf.write_u32(patch_crc)?;
        Ok(buf.into_inner())
    }

    pub fn metadata_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.metadata)
    }

    pub fn validate_source(&self, source: &[u8]) -> bool {
        verify_crc(source, self.source_crc).is_ok()
    }

    pub fn apply(&self, source: &[u8]) -> Result<Vec<u8>> {
        self.apply_with(Default::default(), source)
    }

    /// Replays the actions against `source` into a fresh buffer.
    pub fn apply_with(&self, options: Options, source: &[u8]) -> Result<Vec<u8>> {
        if !options.skip_crc && !self.validate_source(source) {
            return Err(Error::CrcMismatch(CrcKind::Source));
        }
        if source.len() as u64 != self.source_size {
            return Err(Error::SourceSizeMismatch {
                expected: self.source_size,
                actual: source.len(),
            });
        }
        self.check_sizes()?;

        let target_size = usize::try_from(self.target_size).map_err(|_| Error::MalformedPatch)?;
        let mut target = ByteBuffer::try_new(target_size)?;

        let mut source_offset: usize = 0;
        let mut target_offset: usize = 0;
        for action in &self.actions {
            log::trace!("{:#x}: {action:?}", target.offset());
            match action {
                Action::SourceRead { length } => {
                    let start = target.offset();
                    target.write_bytes(source_range(source, start, *length)?)?;
                }
                Action::TargetRead { bytes } => target.write_bytes(bytes)?,
                Action::SourceCopy {
                    length,
                    relative_offset,
                } => {
                    source_offset = move_cursor(source_offset, *relative_offset)?;
                    target.write_bytes(source_range(source, source_offset, *length)?)?;
                    source_offset += length;
                }
                Action::TargetCopy {
                    length,
                    relative_offset,
                } => {
                    target_offset = move_cursor(target_offset, *relative_offset)?;
                    if target_offset >= target.offset() {
                        return Err(Error::OutOfBounds {
                            offset: target_offset,
                            len: *length,
                            size: target.offset(),
                        });
                    }
                    // byte at a time: the range may overlap what is being written
                    for _ in 0..*length {
                        let x = target.get(target_offset)?;
                        target.write_u8(x)?;
                        target_offset += 1;
                    }
                }
            }
        }

        if !target.is_eof() {
            return Err(Error::MalformedPatch);
        }

        let target = target.into_inner();
        if !options.skip_crc {
            verify_crc(&target, self.target_crc).map_err(|_| Error::CrcMismatch(CrcKind::Target))?;
        }

        Ok(target)
    }
}

fn source_range(source: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| source.get(offset..end))
        .ok_or(Error::OutOfBounds {
            offset,
            len,
            size: source.len(),
        })
}

fn move_cursor(cursor: usize, relative_offset: i64) -> Result<usize> {
    isize::try_from(relative_offset)
        .ok()
        .and_then(|offset| cursor.checked_add_signed(offset))
        .ok_or(Error::MalformedPatch)
}

impl fmt::Display for BpsPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Source size: {}", self.source_size)?;
        writeln!(f, "Target size: {}", self.target_size)?;
        writeln!(f, "Metadata: {}", self.metadata_str())?;
        write!(f, "#Actions: {}", self.actions.len())
    }
}
