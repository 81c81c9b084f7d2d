//! PDF compressor CLI.

use anyhow::{Context, Result};
use clap::Parser;
use compress_pdf::{compress_file, CompressOptions};
use std::path::PathBuf;

/// Shrink a PDF by recompressing its embedded images
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input PDF file path
    #[arg(short, long)]
    input: PathBuf,

    /// Output PDF file path
    #[arg(short, long)]
    output: PathBuf,

    /// JPEG quality (1-100)
    #[arg(short, long, default_value = "85")]
    quality: u8,

    /// Target DPI for images; images above it are downsampled
    #[arg(short, long, default_value = "150")]
    dpi: f32,

    /// Verbose output (-v: info, -vv: debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(match args.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    let options = CompressOptions {
        quality: args.quality,
        target_dpi: args.dpi,
    };

    let stats = compress_file(&args.input, &args.output, &options)
        .with_context(|| format!("Failed to compress {}", args.input.display()))?;

    println!(
        "{:.2} MB -> {:.2} MB ({:.2}% reduction, ratio {:.2})",
        stats.original_mb(),
        stats.compressed_mb(),
        stats.percent_reduction(),
        stats.ratio()
    );
    println!(
        "Images: {} found, {} recompressed, {} skipped",
        stats.total_images, stats.recompressed_images, stats.skipped_images
    );
    println!("Output saved to: {}", args.output.display());

    Ok(())
}
