//! Renarc CLI - list and extract Ren'Py-style game archives.
//!
//! This is the main entry point for the renarc command-line application.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use renarc_rpa::{Archive, ArchiveVariant, ExtractOptions};

/// Renarc - Ren'Py-style archive listing and extraction tool
#[derive(Parser)]
#[command(name = "renarc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Archive file to read
    filename: PathBuf,

    /// List file paths instead of extracting
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Destination directory for extraction
    #[arg(short = 'p', long = "path", default_value = ".")]
    path: PathBuf,

    /// Create the destination directory if it does not exist
    #[arg(short = 'm', long = "mkdir")]
    mkdir: bool,

    /// Force a specific format version (e.g. RPA-3.0) instead of detecting it
    #[arg(short = 'f', long = "force")]
    force: Option<String>,

    /// Keep extracting after a per-file failure
    #[arg(long = "continue-on-error")]
    continue_on_error: bool,

    /// Manual index offset in hex, bypassing format detection
    #[arg(short = 'o', long = "offset")]
    offset: Option<String>,

    /// Manual obfuscation key in hex, used together with --offset
    #[arg(short = 'k', long = "key", requires = "offset")]
    key: Option<String>,

    /// Print each extracted path
    #[arg(short = 'v', long = "verbose", conflicts_with = "silent")]
    verbose: bool,

    /// Suppress progress output
    #[arg(short = 's', long = "silent")]
    silent: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut archive = open_archive(&cli)
        .with_context(|| format!("Failed to open archive {}", cli.filename.display()))?;

    if cli.list {
        for path in archive.list_paths() {
            println!("{path}");
        }
        return Ok(());
    }

    extract_archive(&cli, &mut archive)
}

fn open_archive(cli: &Cli) -> Result<Archive> {
    if let Some(offset) = &cli.offset {
        let offset = parse_hex(offset).context("Invalid --offset value")?;
        let key = cli
            .key
            .as_deref()
            .map(parse_hex)
            .transpose()
            .context("Invalid --key value")?;
        return Ok(Archive::open_at(&cli.filename, offset, key)?);
    }

    if let Some(name) = &cli.force {
        let variant = ArchiveVariant::from_name(name)?;
        return Ok(Archive::open_as(&cli.filename, variant)?);
    }

    Ok(Archive::open(&cli.filename)?)
}

fn extract_archive(cli: &Cli, archive: &mut Archive) -> Result<()> {
    let total = archive.index().len() as u64;
    if !cli.silent {
        println!(
            "Extracting {} entries from {}...",
            total,
            cli.filename.display()
        );
    }

    let bar = if cli.silent || cli.verbose {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                .progress_chars("#>-"),
        );
        bar
    };

    let options = ExtractOptions {
        continue_on_error: cli.continue_on_error,
        create_dirs: cli.mkdir,
    };

    let start = Instant::now();
    let verbose = cli.verbose;
    let summary = archive.extract(&cli.path, &options, |_, path| {
        if verbose {
            println!("{path}");
        }
        bar.inc(1);
    })?;
    bar.finish_and_clear();

    for (path, message) in &summary.failures {
        eprintln!("Error extracting {path}: {message}");
    }

    if !cli.silent {
        if summary.is_clean() {
            println!(
                "Extracted {} files in {:?}",
                summary.extracted,
                start.elapsed()
            );
        } else {
            println!(
                "Extracted {} files in {:?} ({} failed)",
                summary.extracted,
                start.elapsed(),
                summary.failures.len()
            );
        }
    }

    // A completed continue-on-error run exits zero even with per-file
    // failures; they were already reported above.
    Ok(())
}

fn parse_hex(value: &str) -> Result<u64> {
    let trimmed = value
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u64::from_str_radix(trimmed, 16)
        .with_context(|| format!("not a hexadecimal number: {value:?}"))
}
