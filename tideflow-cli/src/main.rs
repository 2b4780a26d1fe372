use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tideflow_api::{AggregateRegistry, QueryBuilder};
use tideflow_core::checkpoint::{CheckpointStorage, FsCheckpointStorage};
use tideflow_core::config::{OutputMode, TriggerMode};
use tideflow_core::output::MemorySink;
use tideflow_core::source::MemorySource;
use tideflow_core::window::WindowSpec;

#[derive(Parser, Debug)]
#[command(name = "tideflow")]
#[command(about = "Tideflow micro-batch streaming engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a demo query over a synthetic event source.
    Run {
        /// Number of synthetic events to generate.
        #[arg(long, default_value_t = 200)]
        events: usize,
        /// Number of distinct keys in the synthetic stream.
        #[arg(long, default_value_t = 4)]
        keys: usize,
        /// Deterministic seed for the synthetic stream.
        #[arg(long, default_value_t = 2026)]
        seed: u64,
        /// Tumbling window size in seconds (use --slide-secs for sliding).
        #[arg(long, default_value_t = 10)]
        window_secs: u64,
        /// Optional slide in seconds; enables sliding windows.
        #[arg(long)]
        slide_secs: Option<u64>,
        /// Allowed lateness in seconds.
        #[arg(long, default_value_t = 2)]
        lateness_secs: u64,
        /// Output mode: append | update | complete.
        #[arg(long, default_value = "append")]
        output_mode: String,
        /// Aggregate name: count | sum | min | max.
        #[arg(long, default_value = "count")]
        aggregate: String,
        /// Number of parallel partitions.
        #[arg(long, default_value_t = 2)]
        partitions: usize,
        /// Checkpoint directory; omitted means in-memory checkpoints.
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
    },
    /// List the published checkpoints in a checkpoint directory.
    Checkpoints {
        #[arg(long)]
        dir: PathBuf,
    },
}

fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

#[allow(clippy::too_many_arguments)]
fn run_demo(
    events: usize,
    keys: usize,
    seed: u64,
    window_secs: u64,
    slide_secs: Option<u64>,
    lateness_secs: u64,
    output_mode: &str,
    aggregate: &str,
    partitions: usize,
    checkpoint_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let output_mode: OutputMode = output_mode.parse()?;
    let window = match slide_secs {
        Some(slide) => WindowSpec::sliding(
            Duration::from_secs(window_secs),
            Duration::from_secs(slide),
        ),
        None => WindowSpec::tumbling(Duration::from_secs(window_secs)),
    };

    // Synthetic (key, value) events with mildly out-of-order timestamps.
    let source: MemorySource<(String, i64)> = MemorySource::new();
    let mut state = seed;
    for i in 0..events {
        let key = format!("k{}", (lcg_next(&mut state) as usize) % keys.max(1));
        let jitter = (lcg_next(&mut state) % 1_500) as i64 - 500;
        let ts = ((i as i64) * 1_000 + jitter).max(0);
        let value = (lcg_next(&mut state) % 100) as i64;
        source.push((key, value), ts);
    }

    let sink: MemorySink<String, i64> = MemorySink::new();
    let registry = AggregateRegistry::default();
    let mut builder = QueryBuilder::new("tideflow-demo")
        .source("synthetic", source)
        .key_by(|event: &(String, i64)| event.0.clone())
        .watermark(
            |event: &(String, i64)| event.1,
            Duration::from_secs(lateness_secs),
        )
        .window(window)
        .trigger(TriggerMode::Once)
        .output_mode(output_mode)
        .partition_count(partitions);
    if let Some(dir) = checkpoint_dir {
        builder = builder.checkpoint_location(dir);
    }

    let query = builder
        .aggregate_named(&registry, aggregate, |event: &(String, i64)| event.1)?
        .start(sink.clone())?;

    query.await_termination(Duration::from_secs(30));
    query.join()?;

    for progress in query.progress() {
        println!(
            "increment {}: read={} emitted={} late={} watermark={}ms",
            progress.increment_id,
            progress.rows_read,
            progress.rows_emitted,
            progress.late_dropped,
            progress.watermark
        );
    }
    for row in sink.rows() {
        println!("{} {} -> {}", row.window, row.key, row.value);
    }
    Ok(())
}

fn list_checkpoints(dir: PathBuf) -> anyhow::Result<()> {
    let storage = FsCheckpointStorage::new(&dir)?;
    let ids = storage.list_published()?;
    if ids.is_empty() {
        println!("no published checkpoints in {}", dir.display());
        return Ok(());
    }
    for id in ids {
        match storage.load(id) {
            Ok(manifest) => {
                let offsets: Vec<String> = manifest
                    .offsets
                    .iter()
                    .map(|(source, offset)| format!("{source}={offset}"))
                    .collect();
                println!(
                    "chk-{}: watermark={}ms offsets=[{}] state={}B",
                    manifest.increment_id,
                    manifest.watermark,
                    offsets.join(", "),
                    manifest.state.len()
                );
            }
            Err(err) => println!("chk-{id}: unreadable ({err})"),
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            events,
            keys,
            seed,
            window_secs,
            slide_secs,
            lateness_secs,
            output_mode,
            aggregate,
            partitions,
            checkpoint_dir,
        } => run_demo(
            events,
            keys,
            seed,
            window_secs,
            slide_secs,
            lateness_secs,
            &output_mode,
            &aggregate,
            partitions,
            checkpoint_dir,
        ),
        Commands::Checkpoints { dir } => list_checkpoints(dir),
    }
}
