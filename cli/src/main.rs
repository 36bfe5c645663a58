use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use rompatch::{checksum, BpsMode, CreateOptions, Options, Patch, PatchFormat};

#[derive(Parser)]
#[command(name = "rompatch", about = "Apply and create BPS/IPS ROM patches")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Patches a ROM, writing the result to OUTPUT.
    Apply {
        source: PathBuf,
        patch: PathBuf,
        output: PathBuf,

        #[arg(long)]
        skip_crc: bool,
    },
    /// Creates a patch that turns ORIGINAL into MODIFIED.
    ///
    /// The format is taken from OUTPUT's extension unless --format is given.
    Create {
        original: PathBuf,
        modified: PathBuf,
        output: PathBuf,

        #[arg(long, value_enum)]
        format: Option<Format>,

        /// Search the whole source and target for matches (BPS only, slower).
        #[arg(long)]
        delta: bool,

        /// Metadata string embedded in BPS patches.
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Prints a summary of a patch file.
    Info { patch: PathBuf },
    /// Prints checksums of a file for identification.
    Hash { file: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Bps,
    Ips,
}

impl From<Format> for PatchFormat {
    fn from(value: Format) -> Self {
        match value {
            Format::Bps => PatchFormat::Bps,
            Format::Ips => PatchFormat::Ips,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Args::parse().command {
        Command::Apply {
            source,
            patch,
            output,
            skip_crc,
        } => {
            let source = std::fs::read(source)?;
            let patch = Patch::parse(&std::fs::read(patch)?)?;

            let start = std::time::Instant::now();
            let contents = patch.apply(Options { skip_crc }, &source)?;
            log::info!("applied {:?} patch in {:.02?}", patch.format(), start.elapsed());

            std::fs::write(output, contents)?;
        }
        Command::Create {
            original,
            modified,
            output,
            format,
            delta,
            metadata,
        } => {
            let format = format
                .map(PatchFormat::from)
                .or_else(|| PatchFormat::from_extension(&output))
                .ok_or(rompatch::Error::UnknownFormat)?;
            if delta && format != PatchFormat::Bps {
                log::warn!("--delta only affects BPS patches");
            }

            let original = std::fs::read(original)?;
            let modified = std::fs::read(modified)?;
            let options = CreateOptions {
                bps_mode: if delta { BpsMode::Delta } else { BpsMode::Linear },
                metadata,
            };

            let start = std::time::Instant::now();
            let patch = rompatch::create_patch(format, &options, &original, &modified)?;
            log::info!(
                "created {}-byte {} patch in {:.02?}",
                patch.len(),
                format.extension(),
                start.elapsed()
            );

            std::fs::write(output, patch)?;
        }
        Command::Info { patch } => {
            let patch = Patch::parse(&std::fs::read(patch)?)?;
            println!("{patch}");
            if let Patch::Bps(bps) = &patch {
                println!("Source CRC32: {:08x}", bps.source_crc);
                println!("Target CRC32: {:08x}", bps.target_crc);
                println!("Patch CRC32: {:08x}", bps.patch_crc);
            }
        }
        Command::Hash { file } => {
            let data = std::fs::read(file)?;
            println!("CRC32: {:08x}", checksum::crc32(&data));
            println!("CRC16: {:04x}", checksum::crc16(&data));
            println!("Adler-32: {:08x}", checksum::adler32(&data));
            println!("MD5: {}", checksum::md5_hex(&data));
        }
    }

    Ok(())
}
