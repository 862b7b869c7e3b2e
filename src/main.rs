//! Slotgen - text field to tuple slot converter
//!
//! Command line entry point for scanning delimited text into typed rows,
//! printing generated write-slot routines, and unescaping fields.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use slotgen::codegen::{ExecutionMode, SlotCodegen};
use slotgen::config::ConverterConfig;
use slotgen::descriptor::{TupleDescriptorBuilder, TupleId};
use slotgen::scan::{ScanStats, TextScanner, WriteSlotCache};
use slotgen::text_converter::{EscapeConfig, TextConverter};
use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slotgen")]
#[command(version)]
#[command(about = "Convert delimited text fields into typed tuple slots", long_about = None)]
struct Cli {
    /// Config file (default: search for slotgen.toml from the current directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the IR generated for each slot of a schema
    Ir {
        /// Column types, e.g. "int,string!,double" (`!` = not nullable)
        #[arg(short, long)]
        schema: String,

        /// Escape character
        #[arg(short, long)]
        escape: Option<char>,
    },

    /// Scan delimited text and print one JSON array per row
    Scan {
        /// Column types, e.g. "int,string!,double" (`!` = not nullable)
        #[arg(short, long)]
        schema: String,

        /// Input file (default: stdin)
        input: Option<PathBuf>,

        /// Field delimiter
        #[arg(short, long)]
        delimiter: Option<char>,

        /// Escape character
        #[arg(short, long)]
        escape: Option<char>,

        /// Worker threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Run generated routines through the IR interpreter
        #[arg(long)]
        interp: bool,

        /// Never use generated routines
        #[arg(long)]
        no_codegen: bool,

        /// Stop at the first field that fails to parse
        #[arg(long)]
        abort_on_error: bool,

        /// Print scan statistics to stderr
        #[arg(long)]
        stats: bool,
    },

    /// Remove escape characters from each input line
    Unescape {
        /// Escape character
        #[arg(short, long, default_value = "\\")]
        escape: char,

        /// Input file (default: stdin)
        input: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ConverterConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ConverterConfig::load_from_cwd().context("Failed to load slotgen.toml")?,
    };

    match cli.command {
        Commands::Ir { schema, escape } => cmd_ir(&config, &schema, escape),
        Commands::Scan {
            schema,
            input,
            delimiter,
            escape,
            workers,
            interp,
            no_codegen,
            abort_on_error,
            stats,
        } => {
            let mut config = config;
            if let Some(d) = delimiter {
                config.text.field_delim = d.to_string();
            }
            if let Some(e) = escape {
                config.text.escape_char = e.to_string();
            }
            if let Some(w) = workers {
                config.scan.workers = w;
            }
            if interp {
                config.codegen.mode = ExecutionMode::Interpreted;
            }
            if no_codegen {
                config.codegen.enabled = false;
            }
            if abort_on_error {
                config.scan.abort_on_error = true;
            }
            cmd_scan(&config, &schema, input.as_deref(), stats)
        }
        Commands::Unescape { escape, input } => cmd_unescape(escape, input.as_deref()),
    }
}

fn read_input(input: Option<&Path>) -> Result<Vec<u8>> {
    match input {
        Some(path) => fs::read(path).with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

fn escape_byte(c: char) -> Result<u8> {
    if !c.is_ascii() {
        bail!("Escape character must be a single byte, got {:?}", c);
    }
    Ok(c as u8)
}

fn cmd_ir(config: &ConverterConfig, schema: &str, escape: Option<char>) -> Result<()> {
    let desc = TupleDescriptorBuilder::from_schema(TupleId(0), schema)?.build();
    let escape = match escape {
        Some(c) => EscapeConfig::byte(escape_byte(c)?),
        None => config.escape_config()?,
    };
    let converter = TextConverter::new(escape);
    let mut codegen = SlotCodegen::with_mode(config.codegen.mode);

    for slot in desc.slots() {
        match converter.codegen_write_slot(&mut codegen, &desc, slot) {
            Some(f) => println!(
                "; slot {} ({}): {} [{}]",
                slot.id(),
                slot.ty(),
                f.name(),
                if f.is_compiled() { "compiled" } else { "interpreted" }
            ),
            None => println!("; slot {} ({}): not generated", slot.id(), slot.ty()),
        }
    }
    println!();
    println!("{}", codegen.module());
    Ok(())
}

fn cmd_scan(config: &ConverterConfig, schema: &str, input: Option<&Path>, show_stats: bool) -> Result<()> {
    let scan_config = config.scan_config()?;
    let desc = Arc::new(TupleDescriptorBuilder::from_schema(TupleId(0), schema)?.build());
    let data = read_input(input)?;

    let start = Instant::now();
    let cache = WriteSlotCache::new(config.codegen.mode);
    let scanner = TextScanner::new(Arc::clone(&desc), scan_config, &cache);
    let batches = scanner.scan_parallel(&data, config.scan.workers)?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut stats = ScanStats::default();
    for batch in &batches {
        for row in 0..batch.num_rows() {
            if let Some(json) = batch.row_json(row) {
                writeln!(out, "{}", json)?;
            }
        }
        for err in batch.errors() {
            eprintln!("{}", err);
        }
        stats.merge(batch.stats());
    }
    out.flush()?;

    info!(
        rows = stats.rows,
        parse_errors = stats.parse_errors,
        elapsed_us = start.elapsed().as_micros() as u64,
        "scan finished"
    );
    if show_stats {
        let cache_stats = cache.stats();
        let report = serde_json::json!({
            "scan": stats,
            "generated_slots": (0..desc.slots().len()).filter(|i| scanner.is_generated(*i)).count(),
            "cache": {
                "hits": cache_stats.hits,
                "misses": cache_stats.misses,
                "refused": cache_stats.refused,
            },
        });
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn cmd_unescape(escape: char, input: Option<&Path>) -> Result<()> {
    let converter = TextConverter::new(EscapeConfig::byte(escape_byte(escape)?));
    let data = read_input(input)?;
    if data.is_empty() {
        return Ok(());
    }
    let data = data.strip_suffix(b"\n").unwrap_or(&data);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut buf = Vec::new();
    for line in data.split(|&b| b == b'\n') {
        buf.clear();
        buf.extend_from_slice(line);
        let len = converter.unescape_in_place(&mut buf);
        out.write_all(&buf[..len])?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
