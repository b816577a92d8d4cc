//! Test utilities and mock observers.
//!
//! Observers that record, fail or stall on delivery, so hub and buffer
//! behavior can be checked without a real renderer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Notify, RwLock};

use crate::hub::{HubObserver, ObserverError, ObserverId};
use crate::model::{Batch, Event, HubId, NodeAddress, Notification};

/// Observer that stores every batch it receives.
#[derive(Default)]
pub struct RecordingObserver {
    id: ObserverId,
    received: RwLock<Vec<(HubId, Batch)>>,
    delivered: Notify,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn batches(&self) -> Vec<(HubId, Batch)> {
        self.received.read().await.clone()
    }

    pub async fn batch_count(&self) -> usize {
        self.received.read().await.len()
    }

    /// Flattened event ids in arrival order.
    pub async fn event_ids(&self) -> Vec<i64> {
        self.received
            .read()
            .await
            .iter()
            .flat_map(|(_, batch)| batch.iter().map(|n| n.event.event_id))
            .collect()
    }

    /// Wait until at least `count` batches have arrived.
    pub async fn wait_for_batches(&self, count: usize) {
        loop {
            let notified = self.delivered.notified();
            if self.batch_count().await >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl HubObserver for RecordingObserver {
    fn id(&self) -> ObserverId {
        self.id
    }

    async fn on(&self, batch: Batch, hub: &HubId) -> Result<(), ObserverError> {
        self.received.write().await.push((hub.clone(), batch));
        self.delivered.notify_waiters();
        Ok(())
    }
}

/// Observer whose every delivery fails.
#[derive(Default)]
pub struct FailingObserver {
    id: ObserverId,
}

impl FailingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl HubObserver for FailingObserver {
    fn id(&self) -> ObserverId {
        self.id
    }

    async fn on(&self, _batch: Batch, _hub: &HubId) -> Result<(), ObserverError> {
        Err(ObserverError::Unreachable("observer offline".to_string()))
    }
}

/// Observer whose every delivery panics.
#[derive(Default)]
pub struct PanickingObserver {
    id: ObserverId,
}

impl PanickingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl HubObserver for PanickingObserver {
    fn id(&self) -> ObserverId {
        self.id
    }

    async fn on(&self, _batch: Batch, _hub: &HubId) -> Result<(), ObserverError> {
        panic!("observer crashed while rendering");
    }
}

/// Observer that holds every delivery for `delay` before recording it.
pub struct SlowObserver {
    delay: Duration,
    inner: RecordingObserver,
}

impl SlowObserver {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            inner: RecordingObserver::default(),
        })
    }

    pub fn recorded(&self) -> &RecordingObserver {
        &self.inner
    }
}

#[async_trait]
impl HubObserver for SlowObserver {
    fn id(&self) -> ObserverId {
        self.inner.id()
    }

    async fn on(&self, batch: Batch, hub: &HubId) -> Result<(), ObserverError> {
        tokio::time::sleep(self.delay).await;
        self.inner.on(batch, hub).await
    }
}

pub fn node(port: u16) -> NodeAddress {
    NodeAddress::new(([127, 0, 0, 1], port).into())
}

pub fn event(id: i64) -> Event {
    Event::new(format!("1##{}", node(11111)), id, Utc::now())
}

pub fn batch(ids: &[i64]) -> Batch {
    ids.iter()
        .map(|id| Notification::received_now(event(*id)))
        .collect::<Vec<_>>()
        .into()
}
