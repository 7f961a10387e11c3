//! Persist-then-broadcast of each tick's sample.

use std::sync::Arc;

use station_shared::{Frame, Orientation, TelemetryMessage, Timestamp};
use tracing::{debug, error};

use crate::broadcast::Broadcaster;
use crate::store::{SampleRecord, SampleStore};

/// What happened to one published sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub timestamp: Timestamp,
    /// False when the store append failed.
    pub persisted: bool,
    pub delivered: usize,
    pub dropped: usize,
}

pub struct Publisher {
    store: Arc<dyn SampleStore>,
    broadcaster: Broadcaster,
    last: Option<Timestamp>,
}

impl Publisher {
    /// The first timestamp issued is never earlier than the store's newest
    /// record.
    pub fn new(store: Arc<dyn SampleStore>, broadcaster: Broadcaster) -> Self {
        let last = store.last_timestamp();
        Self {
            store,
            broadcaster,
            last,
        }
    }

    /// Publish a sample stamped with the current wall-clock time.
    pub async fn publish(&mut self, frame: Frame, orientation: Orientation) -> PublishReport {
        self.publish_at(Timestamp::now(), frame, orientation).await
    }

    /// Publish a sample observed at `now`.
    ///
    /// A clock that went backwards is clamped to the previous timestamp. The
    /// record is appended to the store first; a store failure is logged and
    /// reported but the sample is still broadcast.
    pub async fn publish_at(
        &mut self,
        now: Timestamp,
        frame: Frame,
        orientation: Orientation,
    ) -> PublishReport {
        let timestamp = match self.last {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last = Some(timestamp);

        let record = SampleRecord {
            timestamp,
            frame,
            orientation,
        };
        let store = self.store.clone();
        let persisted = match tokio::task::spawn_blocking(move || store.append(&record)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("Failed to persist sample at {timestamp}: {e}");
                false
            }
            Err(e) => {
                error!("Store append task failed for sample at {timestamp}: {e}");
                false
            }
        };

        let message = TelemetryMessage {
            timestamp,
            frame,
            orientation,
        };
        let outcome = match serde_json::to_string(&message) {
            Ok(json) => self.broadcaster.broadcast(Arc::from(json)).await,
            Err(e) => {
                error!("Failed to serialize telemetry message: {e}");
                Default::default()
            }
        };

        debug!(
            "Published sample at {timestamp}: persisted={persisted}, delivered={}, dropped={}",
            outcome.delivered, outcome.dropped
        );

        PublishReport {
            timestamp,
            persisted,
            delivered: outcome.delivered,
            dropped: outcome.dropped,
        }
    }
}
