//! Fill a sample store with synthetic history.
//!
//! Generates one synthetic frame per step between `--from` and `--to`, runs
//! it through the orientation estimator and appends the records in batches.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use station::estimator::{FusionConfig, OrientationEstimator, DEFAULT_GAIN};
use station::store::{CsvStore, SampleRecord, SampleStore};
use station::synthetic::SyntheticGenerator;
use station_shared::Timestamp;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Backfill a sample store with synthetic history")]
struct Args {
    /// CSV sample store path
    #[arg(long, default_value = "station_samples.csv")]
    store: PathBuf,

    /// First timestamp (unix seconds or RFC 3339)
    #[arg(long)]
    from: String,

    /// End of the range, exclusive (defaults to now)
    #[arg(long)]
    to: Option<String>,

    /// Time between samples in milliseconds
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    step_ms: u64,

    /// Records per store append
    #[arg(long, default_value_t = 10_000)]
    batch: usize,

    /// Seed for the synthetic generator
    #[arg(long)]
    seed: Option<u64>,

    /// Madgwick gradient step gain
    #[arg(long, default_value_t = DEFAULT_GAIN)]
    fusion_gain: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let from = Timestamp::parse_param(&args.from).context("Invalid --from")?;
    let to = match &args.to {
        Some(raw) => Timestamp::parse_param(raw).context("Invalid --to")?,
        None => Timestamp::now(),
    };
    if to <= from {
        anyhow::bail!("--to ({to}) must be after --from ({from})");
    }

    let store = CsvStore::open(&args.store)
        .with_context(|| format!("Failed to open sample store {}", args.store.display()))?;
    if let Some(last) = store.last_timestamp() {
        if last > from {
            anyhow::bail!(
                "Store {} already has records up to {last}; backfill must start at or after it",
                args.store.display()
            );
        }
    }

    let step = Duration::from_millis(args.step_ms);
    let mut generator = match args.seed {
        Some(seed) => SyntheticGenerator::seeded(seed),
        None => SyntheticGenerator::new(),
    };
    let mut estimator = OrientationEstimator::new(FusionConfig {
        gain: args.fusion_gain,
        sample_period: step.as_secs_f64(),
    });

    let batch_size = args.batch.max(1);
    let mut batch = Vec::with_capacity(batch_size);
    let mut written = 0usize;
    let mut t = from;

    while t < to {
        let frame = generator.sample_at(t.as_secs_f64());
        let orientation = estimator.update(&frame);
        batch.push(SampleRecord {
            timestamp: t,
            frame,
            orientation,
        });

        if batch.len() == batch_size {
            store.append_batch(&batch).context("Failed to append batch")?;
            written += batch.len();
            batch.clear();
            info!("Wrote {written} records (up to {t})");
        }
        t = t.offset_by(step);
    }

    if !batch.is_empty() {
        store.append_batch(&batch).context("Failed to append batch")?;
        written += batch.len();
    }

    info!(
        "Backfilled {written} records from {from} to {to} into {}",
        args.store.display()
    );
    Ok(())
}
