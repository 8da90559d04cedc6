use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;

use ecm2bin::decoder;
use ecm2bin::io::{create_progress_bar, EcmReader, ImageWriter};

#[derive(Parser, Debug)]
#[command(name = "ecm2bin")]
#[command(about = "Convert ECM (Error-Code Modeler) files back to BIN/ISO disc images", long_about = None)]
struct Args {
    /// Input ECM file path
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output image path (defaults to the input with its .ecm extension stripped)
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Disable progress bar
    #[arg(short, long)]
    quiet: bool,
}

/// `game.bin.ecm` becomes `game.bin`; anything without an `.ecm` extension
/// gets `.bin` appended.
fn default_output_path(input: &Path) -> PathBuf {
    match input.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("ecm") => input.with_extension(""),
        _ => {
            let mut name = input.as_os_str().to_owned();
            name.push(".bin");
            PathBuf::from(name)
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input));

    if !args.input.exists() {
        anyhow::bail!("Input file does not exist: {}", args.input.display());
    }

    if args.input == output_path {
        anyhow::bail!("Input and output files cannot be the same");
    }

    println!(
        "Converting {} to {}",
        args.input.display(),
        output_path.display()
    );

    let start_time = Instant::now();

    let reader = EcmReader::new(&args.input)?;
    let total_bytes = reader.len();

    println!(
        "Input size: {:.2} MB",
        total_bytes as f64 / (1024.0 * 1024.0)
    );

    let mut writer = ImageWriter::new(&output_path)?;

    // Setup progress bar
    let progress = if !args.quiet {
        Some(create_progress_bar(total_bytes))
    } else {
        None
    };

    let summary = decoder::decode_stream(
        reader.as_bytes(),
        total_bytes,
        &mut writer,
        |bytes_in, _total| {
            if let Some(ref pb) = progress {
                pb.set_position(bytes_in);
            }
        },
        || false,
    )
    .with_context(|| format!("Failed to decode {}", args.input.display()))?;

    writer.finish()?;

    // Finalize progress
    if let Some(ref pb) = progress {
        pb.finish_with_message("Conversion complete");
    }

    let elapsed = start_time.elapsed();
    let mb_per_sec = summary.bytes_out as f64 / (1024.0 * 1024.0) / elapsed.as_secs_f64();

    println!(
        "\nDecoded {} records: {} Mode 1 sectors, {} Mode 2 Form 1, {} Mode 2 Form 2, {} raw bytes",
        summary.records,
        summary.sectors[0],
        summary.sectors[1],
        summary.sectors[2],
        summary.raw_bytes
    );
    println!(
        "Wrote {:.2} MB in {:.2?} ({:.2} MB/s)",
        summary.bytes_out as f64 / (1024.0 * 1024.0),
        elapsed,
        mb_per_sec
    );
    println!("Output file: {}", output_path.display());

    Ok(())
}
