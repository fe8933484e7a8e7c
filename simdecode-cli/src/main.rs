//! simdecode command-line interface.
//!
//! Decodes files of simulated event records into crate/slot storage and
//! reports what was routed, dropped and loaded.
#![allow(clippy::uninlined_format_args)]

use clap::{Parser, Subcommand};
use log::info;
use rayon::prelude::*;
use simdecode_io::SimFileReader;
use simdecode_sbs::{
    ChannelRouter, DecoderConfig, DecoderStatistics, HcalRouter, SimDecoder, SlotDataRegistry,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: simdecode_io::Error,
    },

    #[error("Decoder error: {0}")]
    Decoder(#[from] simdecode_sbs::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decoder for simulated SBS detector events.
#[derive(Parser)]
#[command(name = "simdecode")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Decoder configuration (JSON); SBS defaults if omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (repeat for per-hit trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode event files into crate/slot storage
    Decode {
        /// Input event file(s)
        #[arg(required = true)]
        input: Vec<PathBuf>,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show information about an event file
    Info {
        /// Input event file
        input: PathBuf,
    },

    /// Show the hardware address of an HCal module
    Map {
        /// Module index
        module: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match &cli.config {
        Some(path) => DecoderConfig::from_file(path)?,
        None => DecoderConfig::sbs_defaults(),
    };

    match cli.command {
        Commands::Decode { input, json } => decode(&input, &config, json),
        Commands::Info { input } => show_info(&input),
        Commands::Map { module } => show_map(module, &config),
    }
}

/// Decodes every event of `path` with a decoder of its own.
fn decode_file(path: &Path, config: &DecoderConfig) -> Result<DecoderStatistics> {
    let read_err = |source| CliError::Read {
        path: path.to_path_buf(),
        source,
    };
    let reader = SimFileReader::open(path).map_err(read_err)?;
    let mut decoder = SimDecoder::new(config.clone())?;
    let mut registry = SlotDataRegistry::new();

    for event in reader.events() {
        let event = event.map_err(read_err)?;
        decoder.decode_event(&mut registry, &event)?;
    }
    Ok(decoder.statistics().clone())
}

fn decode(input: &[PathBuf], config: &DecoderConfig, json: bool) -> Result<()> {
    let start = Instant::now();

    // Decoders share nothing, so files are processed in parallel.
    let results: Vec<(PathBuf, DecoderStatistics)> = input
        .par_iter()
        .map(|path| decode_file(path, config).map(|stats| (path.clone(), stats)))
        .collect::<Result<_>>()?;

    let mut total = DecoderStatistics::default();
    for (path, stats) in &results {
        info!("{}: {} events", path.display(), stats.events);
        total.merge(stats);
    }
    let elapsed = start.elapsed();

    if json {
        let per_file: BTreeMap<String, &DecoderStatistics> = results
            .iter()
            .map(|(path, stats)| (path.display().to_string(), stats))
            .collect();
        let report = serde_json::json!({ "files": per_file, "total": total });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for (path, stats) in &results {
        println!("{}", path.display());
        print_statistics(stats);
    }
    if results.len() > 1 {
        println!("Total");
        print_statistics(&total);
    }
    println!("Decoded in {:.2?}", elapsed);
    Ok(())
}

fn print_statistics(stats: &DecoderStatistics) {
    println!("  Events:            {}", stats.events);
    println!("  Routed entries:    {}", stats.routed);
    println!("  Unwired (dropped): {}", stats.skipped_unwired);
    println!("  Rejected:          {}", stats.rejected);
    println!("  Ignored:           {}", stats.ignored);
    println!("  Slot loads:        {}", stats.slots_loaded);
    println!("  Load failures:     {}", stats.load_failures);
    println!("  Words dispatched:  {}", stats.words_dispatched);
}

fn show_info(input: &Path) -> Result<()> {
    let read_err = |source| CliError::Read {
        path: input.to_path_buf(),
        source,
    };
    let reader = SimFileReader::open(input).map_err(read_err)?;

    let mut events = 0usize;
    let mut entries = 0usize;
    let mut total_weight = 0.0f64;
    let mut per_detector: BTreeMap<i32, usize> = BTreeMap::new();
    for event in reader.events() {
        let event = event.map_err(read_err)?;
        events += 1;
        entries += event.detector_data.len();
        total_weight += event.weight;
        for entry in &event.detector_data {
            *per_detector.entry(entry.det_id).or_default() += 1;
        }
    }

    println!("File: {}", input.display());
    println!("Size: {} bytes", reader.mapped().len());
    println!("Events: {}", events);
    println!("Detector data entries: {}", entries);
    println!("Summed weight: {}", total_weight);
    for (det_id, count) in &per_detector {
        println!("  detector {:>4}: {} entries", det_id, count);
    }
    Ok(())
}

fn show_map(module: u32, config: &DecoderConfig) -> Result<()> {
    let router = HcalRouter::new(config.hcal.clone())?;
    let layout = config.crate_map.layout()?;
    let addr = router.route(module).map_err(simdecode_sbs::Error::from)?;
    let key = layout
        .to_linear_channel(addr)
        .ok_or(simdecode_sbs::Error::AddressOverflow(addr))?;
    let wired = config.crate_map.slots.contains(&addr.slot_address());

    println!("Module:  {}", module);
    println!("Crate:   {}", addr.crate_id);
    println!("Slot:    {}", addr.slot);
    println!("Channel: {}", addr.channel);
    println!("Key:     {}", key);
    println!("Wired:   {}", if wired { "yes" } else { "no" });
    Ok(())
}
