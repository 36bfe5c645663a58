//! Applying and creating BPS and IPS ROM patches.
//!
//! ```no_run
//! # fn main() -> Result<(), rompatch::Error> {
//! let source = std::fs::read("game.nes").unwrap();
//! let patch = std::fs::read("hack.bps").unwrap();
//! let patched = rompatch::apply_patch(&source, &patch)?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;

pub mod bps;
pub mod buffer;
pub mod checksum;
pub mod ips;
pub mod vlv;

pub use bps::{BpsMode, BpsPatch};
pub use buffer::{ByteBuffer, Endian};
pub use ips::IpsPatch;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Missing '{0}' header at start of patch")]
    MissingHeader(&'static str),
    #[error("Input patch malformed")]
    MalformedPatch,
    #[error("CRC mismatch ({0:?})")]
    CrcMismatch(CrcKind),
    #[error("Source is {actual} bytes but the patch expects {expected}")]
    SourceSizeMismatch { expected: u64, actual: usize },
    #[error("Cannot allocate {0} bytes for the patched output")]
    OutputTooLarge(usize),
    #[error("Access of {len} bytes at {offset:#x} is out of bounds (size {size:#x})")]
    OutOfBounds { offset: usize, len: usize, size: usize },
    #[error("Offset {0:#x} is beyond what an IPS patch can address")]
    FormatLimitExceeded(usize),
    #[error("Unrecognized patch format")]
    UnknownFormat,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcKind {
    Source,
    Target,
    Patch,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Options {
    pub skip_crc: bool,
}

#[derive(Debug, Default, Clone)]
pub struct CreateOptions {
    pub bps_mode: BpsMode,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchFormat {
    Bps,
    Ips,
}

impl PatchFormat {
    /// Identifies a patch by its leading magic bytes.
    pub fn detect(patch: &[u8]) -> Option<Self> {
        if patch.starts_with(bps::MAGIC.as_bytes()) {
            Some(PatchFormat::Bps)
        } else if patch.starts_with(ips::MAGIC.as_bytes()) {
            Some(PatchFormat::Ips)
        } else {
            None
        }
    }

    pub fn from_extension(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("bps") {
            Some(PatchFormat::Bps)
        } else if ext.eq_ignore_ascii_case("ips") {
            Some(PatchFormat::Ips)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            PatchFormat::Bps => "bps",
            PatchFormat::Ips => "ips",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    Bps(BpsPatch),
    Ips(IpsPatch),
}

impl Patch {
    /// Parses a patch, identifying its format from the magic bytes.
    pub fn parse(patch: &[u8]) -> Result<Self> {
        let format = PatchFormat::detect(patch).ok_or(Error::UnknownFormat)?;
        Self::parse_as(format, patch)
    }

    pub fn parse_as(format: PatchFormat, patch: &[u8]) -> Result<Self> {
        Ok(match format {
            PatchFormat::Bps => Patch::Bps(BpsPatch::parse(patch)?),
            PatchFormat::Ips => Patch::Ips(IpsPatch::parse(patch)?),
        })
    }

    pub fn create(
        format: PatchFormat,
        options: &CreateOptions,
        original: &[u8],
        modified: &[u8],
    ) -> Result<Self> {
        Ok(match format {
            PatchFormat::Bps => {
                let metadata = options.metadata.clone().unwrap_or_default().into_bytes();
                Patch::Bps(BpsPatch::create_with_metadata(
                    original,
                    modified,
                    options.bps_mode,
                    metadata,
                )?)
            }
            PatchFormat::Ips => Patch::Ips(IpsPatch::create(original, modified)?),
        })
    }

    pub fn format(&self) -> PatchFormat {
        match self {
            Patch::Bps(_) => PatchFormat::Bps,
            Patch::Ips(_) => PatchFormat::Ips,
        }
    }

    /// Produces the patched output. IPS carries no checksums, so
    /// `options.skip_crc` only affects BPS.
    pub fn apply(&self, options: Options, source: &[u8]) -> Result<Vec<u8>> {
        match self {
            Patch::Bps(patch) => patch.apply_with(options, source),
            Patch::Ips(patch) => patch.apply(source),
        }
    }

    pub fn export(&self) -> Result<Vec<u8>> {
        match self {
            Patch::Bps(patch) => patch.export(),
            Patch::Ips(patch) => patch.export(),
        }
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Patch::Bps(patch) => fmt::Display::fmt(patch, f),
            Patch::Ips(patch) => fmt::Display::fmt(patch, f),
        }
    }
}

pub fn apply_patch(source: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    apply_patch_with(Default::default(), source, patch)
}

pub fn apply_patch_with(options: Options, source: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    Patch::parse(patch)?.apply(options, source)
}

/// Diffs `original` against `modified` and serializes the result.
pub fn create_patch(
    format: PatchFormat,
    options: &CreateOptions,
    original: &[u8],
    modified: &[u8],
) -> Result<Vec<u8>> {
    Patch::create(format, options, original, modified)?.export()
}
