//! Wiring of the acquisition, fusion and distribution pipeline.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::broadcast::{Broadcaster, SubscriberRegistry};
use crate::calibration::CalibrationProfile;
use crate::config::{AcquisitionArgs, StationArgs, StorageArgs};
use crate::config_storage::ConfigStorage;
use crate::downsampler::Downsampler;
use crate::estimator::OrientationEstimator;
use crate::publisher::{PublishReport, Publisher};
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::sensors::recorded::Recording;
use crate::sensors::{FrameSource, SensorChannelSet};
use crate::server::{self, AppState};
use crate::store::{CsvStore, MemoryStore, SampleStore};
use crate::synthetic::SyntheticGenerator;

/// One station: a frame source, its estimator and its publisher.
pub struct Station {
    source: Box<dyn FrameSource>,
    estimator: OrientationEstimator,
    publisher: Publisher,
}

impl Station {
    pub fn new(
        source: Box<dyn FrameSource>,
        estimator: OrientationEstimator,
        publisher: Publisher,
    ) -> Self {
        Self {
            source,
            estimator,
            publisher,
        }
    }

    /// Sample, fuse and publish once.
    pub async fn tick(&mut self) -> PublishReport {
        let frame = self.source.sample();
        let orientation = self.estimator.update(&frame);
        self.publisher.publish(frame, orientation).await
    }

    /// Tick on `scheduler` until shutdown.
    pub async fn run(
        self,
        scheduler: Scheduler,
        shutdown: watch::Receiver<bool>,
    ) -> SchedulerStats {
        let station = Arc::new(Mutex::new(self));
        scheduler
            .run(
                move |_| {
                    let station = station.clone();
                    async move {
                        station.lock().await.tick().await;
                    }
                },
                shutdown,
            )
            .await
    }
}

/// Run `station_serve` until Ctrl-C.
pub async fn run_station(args: StationArgs) -> Result<()> {
    let acquisition = &args.acquisition;

    let calibration = if acquisition.requires_calibration() {
        Some(load_calibration(acquisition)?)
    } else {
        None
    };

    let estimator = match calibration {
        Some(profile) if acquisition.apply_calibration => {
            info!("Applying IMU calibration before fusion");
            OrientationEstimator::with_calibration(acquisition.fusion_config(), profile)
        }
        _ => OrientationEstimator::new(acquisition.fusion_config()),
    };

    let source = build_source(acquisition)?;
    let store = open_store(&args.storage)?;

    let registry = Arc::new(SubscriberRegistry::new());
    let broadcaster = Broadcaster::new(registry.clone(), args.stream.send_timeout());
    let publisher = Publisher::new(store.clone(), broadcaster);
    let station = Station::new(source, estimator, publisher);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = if args.stream.no_stream {
        info!("Streaming disabled, not starting the HTTP server");
        None
    } else {
        let addr = args.stream.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        info!("Serving stream and queries on http://{addr}");

        let state = AppState {
            registry: registry.clone(),
            downsampler: Downsampler::new(store.clone(), args.stream.buckets),
        };
        Some(tokio::spawn(server::serve(
            listener,
            state,
            shutdown_rx.clone(),
        )))
    };

    let scheduler = Scheduler::new(acquisition.period());
    info!("Sampling every {:?}", scheduler.period());
    let acquisition_task = tokio::spawn(station.run(scheduler, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    shutdown_tx.send_replace(true);

    let stats = acquisition_task.await.context("Acquisition task failed")?;
    registry.close_all();

    if let Some(server) = server {
        server
            .await
            .context("HTTP server task failed")?
            .context("HTTP server error")?;
    }

    info!(
        "Station stopped after {} ticks ({} overruns)",
        stats.ticks, stats.overruns
    );
    Ok(())
}

fn load_calibration(acquisition: &AcquisitionArgs) -> Result<CalibrationProfile> {
    let Some(path) = &acquisition.calibration else {
        let storage = ConfigStorage::new().context("Failed to initialize config storage")?;
        return stored_calibration(&storage);
    };
    let profile = CalibrationProfile::load_from_file(path)
        .with_context(|| format!("Failed to load calibration profile {}", path.display()))?;
    info!("Loaded calibration profile from {}", path.display());
    Ok(profile)
}

/// The profile kept in config storage. Missing or unreadable is an error.
fn stored_calibration(storage: &ConfigStorage) -> Result<CalibrationProfile> {
    let path = storage.calibration_path();
    let profile = storage
        .get_calibration()
        .with_context(|| {
            format!(
                "No calibration profile at {}; run calibrate_imu or pass --calibration",
                path.display()
            )
        })?
        .with_context(|| format!("Failed to load calibration profile {}", path.display()))?;
    info!("Loaded calibration profile from {}", path.display());
    Ok(profile)
}

fn build_source(acquisition: &AcquisitionArgs) -> Result<Box<dyn FrameSource>> {
    if acquisition.synthetic {
        let generator = match acquisition.seed {
            Some(seed) => SyntheticGenerator::seeded(seed),
            None => SyntheticGenerator::new(),
        };
        info!("Using synthetic frames");
        return Ok(Box::new(generator));
    }

    let channels = match &acquisition.recording {
        Some(path) => recorded_channels(path)?,
        None => SensorChannelSet::new(None, None, None)
            .context("No sensor drivers configured; pass --recording or --synthetic")?,
    };
    Ok(Box::new(channels))
}

fn recorded_channels(path: &Path) -> Result<SensorChannelSet> {
    let recording = Recording::load(path)
        .with_context(|| format!("Failed to load recording {}", path.display()))?;
    info!(
        "Replaying {} recorded samples from {}",
        recording.len(),
        path.display()
    );
    let (thermal, light, inertial) = recording.channels();
    Ok(SensorChannelSet::new(
        Some(thermal),
        Some(light),
        Some(inertial),
    )?)
}

fn open_store(storage: &StorageArgs) -> Result<Arc<dyn SampleStore>> {
    if storage.memory_store {
        info!("Using in-memory sample store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = CsvStore::open(&storage.store)
        .with_context(|| format!("Failed to open sample store {}", storage.store.display()))?;
    Ok(Arc::new(store))
}
