use clap::Parser;

#[derive(clap::Parser)]
struct Args {
    source: std::path::PathBuf,
    patch: std::path::PathBuf,
    output: std::path::PathBuf,

    #[arg(long)]
    skip_crc: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let source = std::fs::read(&args.source)?;
    let patch = std::fs::read(&args.patch)?;

    let format = rompatch::PatchFormat::detect(&patch)
        .or_else(|| rompatch::PatchFormat::from_extension(&args.patch))
        .ok_or(rompatch::Error::UnknownFormat)?;
    log::debug!("{} is a {format:?} patch", args.patch.display());

    let start = std::time::Instant::now();
    let contents = rompatch::Patch::parse_as(format, &patch)?.apply(
        rompatch::Options {
            skip_crc: args.skip_crc,
        },
        &source,
    )?;
    log::info!("took {:.02?}", start.elapsed());

    std::fs::write(args.output, contents)?;

    Ok(())
}
