use clap::{Parser, Subcommand};
use kipblz::blz::{self, BoundsPolicy, CompressionMode};
use kipblz::info::KipInfo;
use kipblz::kip::{BuildOptions, Kip1, ParseOptions, SegmentCompression};
use log::{info, LevelFilter};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kipblz", about = "BLZ codec and KIP1 container tools")]
struct Cli {
    /// More output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Raw BLZ blocks
    Blz {
        #[command(subcommand)]
        op: BlzOp,
    },
    /// KIP1 executables
    Kip1 {
        #[command(subcommand)]
        op: KipOp,
    },
}

#[derive(Subcommand)]
enum BlzOp {
    /// Compress a file into a BLZ block
    Compress {
        /// Skip the LZ-CUE lookahead
        #[arg(long)]
        fast: bool,
        input: PathBuf,
        output: PathBuf,
    },
    /// Decompress a BLZ block
    Decompress {
        input: PathBuf,
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum KipOp {
    /// Write the KIP1 with every segment stored uncompressed
    Decompress {
        /// Decode segments in place like a loader
        #[arg(long)]
        permissive: bool,
        input: PathBuf,
        output: PathBuf,
    },
    /// Write the KIP1 with segments 0-2 BLZ compressed where it helps
    Recompress {
        /// Skip the LZ-CUE lookahead
        #[arg(long)]
        fast: bool,
        /// Decode segments in place like a loader
        #[arg(long)]
        permissive: bool,
        input: PathBuf,
        output: PathBuf,
    },
    /// Show header, segment table and capabilities
    Info {
        #[arg(long)]
        json: bool,
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {

        // ── BLZ ──────────────────────────────────────────────────────────────
        Commands::Blz { op: BlzOp::Compress { fast, input, output } } => {
            let data = std::fs::read(&input)?;
            if data.is_empty() {
                return Err(format!("zero sized input file '{}'", input.display()).into());
            }
            let mode = if fast { CompressionMode::Fast } else { CompressionMode::Best };
            let packed = blz::compress_with(&data, mode);
            if packed.len() > data.len() {
                return Err(format!(
                    "compression inflated input from {} to {} bytes",
                    data.len(),
                    packed.len()
                )
                .into());
            }
            std::fs::write(&output, &packed)?;
            println!("Compressed input from {} to {} bytes.", data.len(), packed.len());
        }

        Commands::Blz { op: BlzOp::Decompress { input, output } } => {
            let block = std::fs::read(&input)?;
            let data = blz::decompress(&block)?;
            std::fs::write(&output, &data)?;
            println!("Decompressed input from {} to {} bytes.", block.len(), data.len());
        }

        // ── KIP1 ─────────────────────────────────────────────────────────────
        Commands::Kip1 { op: KipOp::Decompress { permissive, input, output } } => {
            let kip = read_kip(&input, permissive)?;
            write_kip(&kip, SegmentCompression::Off, &output)?;
        }

        Commands::Kip1 { op: KipOp::Recompress { fast, permissive, input, output } } => {
            let kip = read_kip(&input, permissive)?;
            let compression = if fast { SegmentCompression::Fast } else { SegmentCompression::Best };
            write_kip(&kip, compression, &output)?;
        }

        Commands::Kip1 { op: KipOp::Info { json, input } } => {
            let kip = read_kip(&input, false)?;
            let report = KipInfo::from_kip(&kip);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.parse_default_env();
    builder.format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()));
    let _ = builder.try_init();
}

fn read_kip(path: &PathBuf, permissive: bool) -> Result<Kip1, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    let policy = if permissive { BoundsPolicy::Permissive } else { BoundsPolicy::Strict };
    let kip = Kip1::parse_with(&bytes, &ParseOptions { policy })
        .map_err(|e| format!("parsing KIP1 '{}': {e}", path.display()))?;
    info!("read '{}' ({} bytes, {} trailing)", path.display(), bytes.len(), kip.trailing.len());
    Ok(kip)
}

fn write_kip(kip: &Kip1, compression: SegmentCompression, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let image = kip.build(&BuildOptions { compression });
    for (index, info) in image.header.segments.iter().enumerate() {
        if !info.is_empty() {
            info!(
                "segment {index}: {} bytes stored, {} decompressed, BLZ {}",
                info.compressed_size,
                info.decompressed_size,
                image.header.is_compressed(index)
            );
        }
    }
    let bytes = image.serialize();
    std::fs::write(path, &bytes)?;
    println!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
