//! Per-node hub actor.
//!
//! Holds the registry of remote observers and fans every flushed batch out
//! to all of them. The registry lives only as long as the activation: after
//! deactivation observers must subscribe again.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep_until;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{Batch, HubId};
use crate::runtime::{
    activation_state, await_activation, ActivationState, HubOptions, IdleDeadline,
    TransportError,
};

/// Result type for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;

/// Errors surfaced to hub callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The observer is already registered. Distinct from every transport failure
    /// so subscribers can treat a repeated subscribe as success.
    #[error("Cannot subscribe already subscribed observer {0}")]
    AlreadySubscribed(ObserverId),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl HubError {
    pub fn is_already_subscribed(&self) -> bool {
        matches!(self, Self::AlreadySubscribed(_))
    }
}

/// Failure reported by an observer's receive call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ObserverError {
    #[error("Observer unreachable: {0}")]
    Unreachable(String),

    #[error("Observer rejected batch: {0}")]
    Rejected(String),
}

/// Identity of an observer in hub registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiver of fanned-out batches.
///
/// Called concurrently by every hub the observer is subscribed to.
#[async_trait]
pub trait HubObserver: Send + Sync {
    /// Stable identity used as the registry key.
    fn id(&self) -> ObserverId;

    /// Receive one batch published by `hub`.
    async fn on(&self, batch: Batch, hub: &HubId) -> std::result::Result<(), ObserverError>;
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Observers that accepted the batch.
    pub delivered: usize,
    /// Observers that failed or timed out.
    pub failed: usize,
}

enum HubMessage {
    Init {
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        observer: Arc<dyn HubObserver>,
        reply: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        id: ObserverId,
        reply: oneshot::Sender<bool>,
    },
    Publish {
        batch: Batch,
        reply: oneshot::Sender<FanOutReport>,
    },
    ObserverCount {
        reply: oneshot::Sender<usize>,
    },
    Deactivate,
}

/// Handle to one hub activation.
#[derive(Clone)]
pub struct HubHandle {
    hub_id: HubId,
    tx: mpsc::UnboundedSender<HubMessage>,
    state: watch::Receiver<ActivationState>,
}

impl HubHandle {
    /// Activate a hub on the current runtime.
    pub fn spawn(hub_id: HubId, idle_timeout: Duration, options: HubOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = activation_state();

        let actor = HubActor {
            hub_id: hub_id.clone(),
            observers: HashMap::new(),
            idle: IdleDeadline::new(idle_timeout),
            options,
            state: state_tx,
        };
        tokio::spawn(actor.run(rx));

        Self { hub_id, tx, state }
    }

    pub fn hub_id(&self) -> &HubId {
        &self.hub_id
    }

    pub fn state(&self) -> ActivationState {
        *self.state.borrow()
    }

    /// Whether calls can still reach this activation.
    pub fn is_live(&self) -> bool {
        !self.tx.is_closed() && self.state() != ActivationState::Deactivated
    }

    /// Wait until the activation is `Active`.
    pub async fn init(&self, timeout: Duration) -> std::result::Result<(), TransportError> {
        let mut state = self.state.clone();
        await_activation(&mut state, self.hub_id.as_str(), timeout).await?;
        self.call(|reply| HubMessage::Init { reply }).await
    }

    /// Register an observer.
    pub async fn subscribe(&self, observer: Arc<dyn HubObserver>) -> Result<()> {
        self.call(|reply| HubMessage::Subscribe { observer, reply })
            .await?
    }

    /// Remove an observer. Returns whether it was registered.
    pub async fn unsubscribe(&self, id: ObserverId) -> Result<bool> {
        Ok(self.call(|reply| HubMessage::Unsubscribe { id, reply }).await?)
    }

    /// Fan a batch out to every registered observer.
    ///
    /// Resolves once every observer call has finished or timed out. The hub
    /// itself keeps serving other calls meanwhile.
    pub async fn publish(&self, batch: Batch) -> Result<FanOutReport> {
        Ok(self.call(|reply| HubMessage::Publish { batch, reply }).await?)
    }

    pub async fn observer_count(&self) -> Result<usize> {
        Ok(self.call(|reply| HubMessage::ObserverCount { reply }).await?)
    }

    /// Deactivate and wait for the registry to be discarded.
    pub async fn deactivate(&self) {
        let _ = self.tx.send(HubMessage::Deactivate);
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == ActivationState::Deactivated).await;
    }

    async fn call<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> HubMessage,
    ) -> std::result::Result<T, TransportError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(message(reply))
            .map_err(|_| self.unavailable())?;
        response.await.map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> TransportError {
        TransportError::ActorUnavailable(self.hub_id.to_string())
    }
}

struct HubActor {
    hub_id: HubId,
    observers: HashMap<ObserverId, Arc<dyn HubObserver>>,
    idle: IdleDeadline,
    options: HubOptions,
    state: watch::Sender<ActivationState>,
}

impl HubActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubMessage>) {
        let _ = self.state.send(ActivationState::Active);
        info!(hub = %self.hub_id, "Hub activated");

        let idle = sleep_until(self.idle.deadline());
        tokio::pin!(idle);

        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(message) = message else { break };
                    self.idle.touch();
                    idle.as_mut().reset(self.idle.deadline());
                    if !self.handle(message) {
                        break;
                    }
                }
                _ = &mut idle => {
                    info!(hub = %self.hub_id, "Hub idle, deactivating");
                    break;
                }
            }
        }

        let dropped = self.observers.len();
        self.observers.clear();
        let _ = self.state.send(ActivationState::Deactivated);
        info!(hub = %self.hub_id, observers = dropped, "Hub deactivated");
    }

    /// Returns false when the activation should end.
    fn handle(&mut self, message: HubMessage) -> bool {
        match message {
            HubMessage::Init { reply } => {
                let _ = reply.send(());
            }
            HubMessage::Subscribe { observer, reply } => {
                let _ = reply.send(self.subscribe(observer));
            }
            HubMessage::Unsubscribe { id, reply } => {
                let removed = self.observers.remove(&id).is_some();
                if removed {
                    info!(hub = %self.hub_id, observer = %id, "Observer unsubscribed");
                }
                let _ = reply.send(removed);
            }
            HubMessage::Publish { batch, reply } => self.publish(batch, reply),
            HubMessage::ObserverCount { reply } => {
                let _ = reply.send(self.observers.len());
            }
            HubMessage::Deactivate => return false,
        }
        true
    }

    fn subscribe(&mut self, observer: Arc<dyn HubObserver>) -> Result<()> {
        let id = observer.id();
        if self.observers.contains_key(&id) {
            debug!(hub = %self.hub_id, observer = %id, "Observer already subscribed");
            return Err(HubError::AlreadySubscribed(id));
        }
        self.observers.insert(id, observer);
        info!(
            hub = %self.hub_id,
            observer = %id,
            observers = self.observers.len(),
            "Observer subscribed"
        );
        Ok(())
    }

    fn publish(&self, batch: Batch, reply: oneshot::Sender<FanOutReport>) {
        if self.observers.is_empty() {
            debug!(hub = %self.hub_id, size = batch.len(), "No observers, batch discarded");
            let _ = reply.send(FanOutReport::default());
            return;
        }

        let observers: Vec<_> = self.observers.values().cloned().collect();
        let hub_id = self.hub_id.clone();
        let timeout = self.options.delivery_timeout;

        tokio::spawn(async move {
            let report = fan_out(observers, batch, hub_id, timeout).await;
            let _ = reply.send(report);
        });
    }
}

/// Deliver a batch to every observer concurrently.
///
/// Each call runs in its own task, so a failing, hung or panicking observer
/// only counts as failed.
#[tracing::instrument(
    name = "hub.fan_out",
    skip_all,
    fields(hub = %hub_id, size = batch.len())
)]
async fn fan_out(
    observers: Vec<Arc<dyn HubObserver>>,
    batch: Batch,
    hub_id: HubId,
    timeout: Duration,
) -> FanOutReport {
    let calls = observers.into_iter().map(|observer| {
        let id = observer.id();
        let batch = Arc::clone(&batch);
        let hub_id = hub_id.clone();
        let delivery = tokio::spawn(async move {
            tokio::time::timeout(timeout, observer.on(batch, &hub_id)).await
        });

        async move {
            match delivery.await {
                Ok(Ok(Ok(()))) => true,
                Ok(Ok(Err(e))) => {
                    warn!(observer = %id, error = %e, "Observer delivery failed");
                    false
                }
                Ok(Err(_)) => {
                    warn!(observer = %id, timeout = ?timeout, "Observer delivery timed out");
                    false
                }
                Err(e) => {
                    warn!(observer = %id, error = %e, "Observer delivery panicked");
                    false
                }
            }
        }
    });

    let results = join_all(calls).await;
    let delivered = results.iter().filter(|ok| **ok).count();
    let report = FanOutReport {
        delivered,
        failed: results.len() - delivered,
    };
    debug!(delivered = report.delivered, failed = report.failed, "Batch fanned out");
    report
}

#[cfg(test)]
mod tests;
