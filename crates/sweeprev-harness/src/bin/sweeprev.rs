//! CLI entrypoint for the sweeprev trace replayer.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use sweeprev_core::config::{
    DEFAULT_ALLOCATED_FRACTION, DEFAULT_CHUNKS_PER_POOL, DEFAULT_EMIT_PERIOD_MS,
    DEFAULT_POOL_GAP_THRESHOLD,
};
use sweeprev_core::{Replay, ReplayConfig, RevokerKind};
use sweeprev_harness::{LogEmitter, LogLevel, run_trace};

/// Replay an allocator trace and measure sweeping-revocation cost.
#[derive(Debug, Parser)]
#[command(name = "sweeprev")]
#[command(about = "Replay allocator traces through a sweeping-revocation model")]
struct Cli {
    /// Revoker to model: naive, compacting or account.
    #[arg(default_value = "naive", value_parser = parse_revoker)]
    revoker: RevokerKind,
    /// Minimum level of structured log entries to write.
    #[arg(long, default_value = "error", value_parser = parse_log_level)]
    log_level: LogLevel,
    /// Write the textual allocation map to this file.
    #[arg(long)]
    allocation_map_output: Option<PathBuf>,
    /// JSONL trace of timed events (default: stdin).
    #[arg(long)]
    trace: Option<PathBuf>,
    /// JSONL log destination (default: stderr).
    #[arg(long)]
    log_output: Option<PathBuf>,
    /// Maximum number of intervals one sweep may submit.
    #[arg(long, default_value_t = usize::MAX)]
    sweep_capacity: usize,
    /// Minimum simulated milliseconds between snapshots.
    #[arg(long, default_value_t = DEFAULT_EMIT_PERIOD_MS)]
    emit_period_ms: u64,
    /// Gap below which occupied intervals share an allocation-map pool.
    #[arg(long, default_value_t = DEFAULT_POOL_GAP_THRESHOLD)]
    pool_gap: u64,
    /// Chunks rendered per allocation-map pool.
    #[arg(long, default_value_t = DEFAULT_CHUNKS_PER_POOL)]
    chunks_per_pool: usize,
    /// Allocated coverage for a chunk to render as allocated.
    #[arg(long, default_value_t = DEFAULT_ALLOCATED_FRACTION)]
    allocated_fraction: f64,
}

fn parse_revoker(s: &str) -> Result<RevokerKind, String> {
    RevokerKind::from_str_loose(s).map_err(|e| e.to_string())
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    LogLevel::from_str_loose(s).ok_or_else(|| {
        format!("unknown log level '{s}' (expected trace, debug, info, warn, error or fatal)")
    })
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = ReplayConfig {
        revoker: cli.revoker,
        sweep_capacity: cli.sweep_capacity,
        emit_period_ms: cli.emit_period_ms,
        pool_gap_threshold: cli.pool_gap,
        chunks_per_pool: cli.chunks_per_pool,
        allocated_fraction: cli.allocated_fraction,
    };
    let mut replay = Replay::new(config)?;
    replay.attach_graph_output(BufWriter::new(io::stdout()))?;
    if let Some(path) = &cli.allocation_map_output {
        replay.attach_allocation_map(BufWriter::new(File::create(path)?))?;
    }

    let run_id = format!("{}-{}", cli.revoker.as_str(), std::process::id());
    let mut log = match &cli.log_output {
        Some(path) => LogEmitter::to_file(path, &run_id, cli.log_level)?,
        None => LogEmitter::to_writer(Box::new(io::stderr()), &run_id, cli.log_level),
    };

    let input: Box<dyn BufRead> = match &cli.trace {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(io::stdin().lock()),
    };

    match run_trace(&mut replay, input, &mut log) {
        Ok(summary) => {
            eprintln!("{summary}");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("sweeprev: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
