//! Synthetic event generator for load testing the relay.
//!
//! Each publisher fires on a randomized period and routes one event through
//! its node's gateway. Publishing is fire-and-forget: the timer never waits
//! for the gateway.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::gateway::HubGateway;
use crate::model::{Event, NodeAddress};

/// Publisher timing.
#[derive(Debug, Clone)]
pub struct PublisherOptions {
    pub min_period: Duration,
    pub max_period: Duration,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            min_period: Duration::from_millis(500),
            max_period: Duration::from_millis(1500),
        }
    }
}

impl PublisherOptions {
    /// Next period, uniform in `[min_period, max_period]`.
    pub fn next_period(&self) -> Duration {
        if self.max_period <= self.min_period {
            return self.min_period;
        }
        rand::rng().random_range(self.min_period..=self.max_period)
    }
}

/// Stable sender identity: `"{key}##{address}"`.
pub fn sender_id(key: i64, address: &NodeAddress) -> String {
    format!("{}##{}", key, address)
}

/// Pseudo-unique event id: current time in 100ns ticks XOR the publisher key.
///
/// Collisions are possible and tolerated.
pub fn next_event_id(key: i64) -> i64 {
    let ticks = Utc::now()
        .timestamp_nanos_opt()
        .map(|ns| ns / 100)
        .unwrap_or_default();
    ticks ^ key
}

/// Handle to a running publisher.
pub struct PublisherHandle {
    key: i64,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PublisherHandle {
    /// Start publishing through `gateway`.
    pub fn spawn(key: i64, gateway: Arc<HubGateway>, options: PublisherOptions) -> Self {
        let (cancel, mut cancel_rx) = watch::channel(false);
        let sender = sender_id(key, &gateway.local_address());

        let task = tokio::spawn(async move {
            info!(publisher = key, sender = %sender, "Publisher started");

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(options.next_period()) => {
                        let event = Event::new(sender.clone(), next_event_id(key), Utc::now());
                        let gateway = Arc::clone(&gateway);
                        tokio::spawn(async move {
                            match gateway.publish(event).await {
                                Ok(buffer) => {
                                    debug!(publisher = key, buffer = %buffer, "Event published")
                                }
                                Err(e) => warn!(publisher = key, error = %e, "Publish failed"),
                            }
                        });
                    }
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(publisher = key, "Publisher stopped");
        });

        Self { key, cancel, task }
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    /// Stop the timer and wait for the task to exit.
    pub async fn stop(self) {
        let _ = self.cancel.send(true);
        let _ = self.task.await;
    }
}

/// Start publishers `1..=count`, spread across `gateways` by key.
pub fn spawn_publishers(
    count: usize,
    gateways: &[Arc<HubGateway>],
    options: &PublisherOptions,
) -> Vec<PublisherHandle> {
    if gateways.is_empty() {
        return Vec::new();
    }

    (1..=count)
        .map(|key| {
            let gateway = Arc::clone(&gateways[(key - 1) % gateways.len()]);
            PublisherHandle::spawn(key as i64, gateway, options.clone())
        })
        .collect()
}
