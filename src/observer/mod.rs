//! Cluster-wide subscription client.
//!
//! Keeps one standing subscription against the hub of every active node.
//! Instead of reacting to membership changes it reconciles on a fixed
//! interval: each pass subscribes to every listed hub and treats "already
//! subscribed" as success. Repeated passes heal
//! - hubs that deactivated and lost their registry
//! - nodes that joined since the last pass
//! - subscribe calls that failed on an earlier pass

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::directory::{DirectoryError, NodeDirectory};
use crate::hub::{HubError, HubObserver, ObserverError, ObserverId};
use crate::model::{Batch, HubId, NodeAddress};
use crate::runtime::Cluster;

pub mod render;

pub use render::{ChannelRenderer, Delivery, LogRenderer, RenderedBatch, Renderer};

/// Default wait between resubscription passes.
pub const DEFAULT_RESUBSCRIBE_INTERVAL: Duration = Duration::from_secs(120);

/// Errors that abort a subscription pass.
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Subscribe to {address} failed: {source}")]
    Hub {
        address: NodeAddress,
        #[source]
        source: HubError,
    },
}

/// Summary of one subscription pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeReport {
    /// Hubs that accepted a new subscription.
    pub subscribed: usize,
    /// Hubs that already had this observer.
    pub already_subscribed: usize,
}

/// The observer registered with every hub.
///
/// Computes per-notification latency on receipt and hands the batch to the
/// renderer. Safe to call concurrently from many hubs.
pub struct RelayObserver {
    id: ObserverId,
    renderer: Arc<dyn Renderer>,
}

impl RelayObserver {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self {
            id: ObserverId::new(),
            renderer,
        }
    }
}

#[async_trait]
impl HubObserver for RelayObserver {
    fn id(&self) -> ObserverId {
        self.id
    }

    async fn on(&self, batch: Batch, hub: &HubId) -> Result<(), ObserverError> {
        let now = Utc::now();
        let deliveries = batch
            .iter()
            .map(|notification| Delivery {
                latency_secs: notification.latency_secs(now),
                notification: notification.clone(),
            })
            .collect();

        self.renderer.render(RenderedBatch {
            hub: hub.clone(),
            deliveries,
        });
        Ok(())
    }
}

/// Subscribes one observer to every active node's hub.
pub struct SubscriptionClient {
    observer: Arc<RelayObserver>,
    directory: Arc<dyn NodeDirectory>,
    cluster: Arc<Cluster>,
    resubscribe_interval: Duration,
}

impl SubscriptionClient {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        directory: Arc<dyn NodeDirectory>,
        cluster: Arc<Cluster>,
    ) -> Self {
        Self {
            observer: Arc::new(RelayObserver::new(renderer)),
            directory,
            cluster,
            resubscribe_interval: DEFAULT_RESUBSCRIBE_INTERVAL,
        }
    }

    pub fn with_resubscribe_interval(mut self, interval: Duration) -> Self {
        self.resubscribe_interval = interval;
        self
    }

    pub fn observer_id(&self) -> ObserverId {
        self.observer.id()
    }

    pub fn resubscribe_interval(&self) -> Duration {
        self.resubscribe_interval
    }

    /// Subscribe to every currently active node's hub.
    ///
    /// "Already subscribed" counts as success. Any other failure aborts the
    /// rest of the pass; the next pass retries.
    #[tracing::instrument(
        name = "observer.subscribe_all",
        skip_all,
        fields(observer = %self.observer.id())
    )]
    pub async fn subscribe_all(&self) -> Result<SubscribeReport, SubscribeError> {
        let nodes = self.directory.active_nodes().await?;
        let mut report = SubscribeReport::default();

        for address in nodes {
            let observer: Arc<dyn HubObserver> = self.observer.clone();
            match self.cluster.hub(address).subscribe(observer).await {
                Ok(()) => report.subscribed += 1,
                Err(e) if e.is_already_subscribed() => {
                    debug!(node = %address, "Already subscribed");
                    report.already_subscribed += 1;
                }
                Err(source) => return Err(SubscribeError::Hub { address, source }),
            }
        }

        info!(
            subscribed = report.subscribed,
            already_subscribed = report.already_subscribed,
            "Subscription pass complete"
        );
        Ok(report)
    }

    /// Best-effort removal of this observer from every active hub.
    ///
    /// Returns how many hubs had it registered.
    pub async fn unsubscribe_all(&self) -> usize {
        let nodes = match self.directory.active_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "Cannot list nodes for unsubscribe");
                return 0;
            }
        };

        let mut removed = 0;
        for address in nodes {
            match self.cluster.hub(address).unsubscribe(self.observer.id()).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(node = %address, error = %e, "Unsubscribe failed"),
            }
        }
        removed
    }

    /// Run `subscribe_all` every `resubscribe_interval` until stopped.
    ///
    /// Pass failures are logged and left for the next pass.
    pub fn spawn_resubscription(self: &Arc<Self>) -> ResubscribeHandle {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let client = Arc::clone(self);

        let task = tokio::spawn(async move {
            let interval = client.resubscribe_interval;
            info!(interval = ?interval, "Resubscription loop started");

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = client.subscribe_all().await {
                            warn!(error = %e, "Subscription pass aborted");
                        }
                    }
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            info!("Resubscription loop stopped");
                            break;
                        }
                    }
                }
            }
        });

        ResubscribeHandle {
            cancel: cancel_tx,
            task,
        }
    }
}

/// Handle to a running resubscription loop.
pub struct ResubscribeHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ResubscribeHandle {
    /// Signal the loop to stop after the current pass.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests;
