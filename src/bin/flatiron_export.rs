//! flatiron-export: flatten JSON into CSV
//!
//! Usage:
//!   # Single JSON document (object or array) from a file
//!   flatiron-export --columns name,age data.json
//!
//!   # NDJSON stream from stdin
//!   cat events.jsonl | flatiron-export --ndjson --columns id,ts,level

// Use MiMalloc allocator for better performance on large inputs
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use flatiron::{Dest, DynamicValue, Source};
use std::fs::File;
use std::io::{self, BufReader, Read};
use tracing::Level;
use tracing_subscriber::fmt;

#[derive(Parser, Debug)]
#[command(name = "flatiron-export")]
#[command(about = "Flatten JSON into CSV", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// Treat input as a stream of JSON objects (NDJSON) instead of one document
    #[arg(long)]
    ndjson: bool,

    /// Comma-separated top-level keys to export as columns
    #[arg(long, short = 'c')]
    columns: String,

    /// Enable debug logging (written to stderr, stdout stays clean for CSV)
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::WARN };
    fmt::Subscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    let columns: Vec<String> = args
        .columns
        .split(',')
        .map(|c| c.trim().to_string())
        .collect();

    let reader: Box<dyn Read + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("failed to open {path}"))?,
        )),
        None => Box::new(io::stdin()),
    };

    let root = if args.ndjson {
        DynamicValue::stream_json(reader)
    } else {
        DynamicValue::read_json(reader)
    };

    let flattener = move |s: &Source, d: &mut dyn Dest| {
        for column in &columns {
            d.col(column, s.key(&[column.as_str()]));
        }
    };

    root.into_csv(flattener)
        .export(io::stdout().lock())
        .context("export failed")?;

    Ok(())
}
