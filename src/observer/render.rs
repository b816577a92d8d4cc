//! Rendering of received batches.

use std::fmt;

use tokio::sync::mpsc;
use tracing::info;

use crate::model::{HubId, Notification};

/// One received notification with its end-to-end latency.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub notification: Notification,
    pub latency_secs: f64,
}

/// A received batch, ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedBatch {
    pub hub: HubId,
    pub deliveries: Vec<Delivery>,
}

impl RenderedBatch {
    /// Display lines, one per delivery.
    pub fn lines(&self) -> impl Iterator<Item = DeliveryLine<'_>> {
        self.deliveries.iter().map(|delivery| DeliveryLine {
            delivery,
            hub: &self.hub,
        })
    }
}

/// `"{sender} published {id} on {created} via {hub}. Latency: {latency} s"`
pub struct DeliveryLine<'a> {
    delivery: &'a Delivery,
    hub: &'a HubId,
}

impl fmt::Display for DeliveryLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let event = &self.delivery.notification.event;
        write!(
            f,
            "{} published {} on {} via {}. Latency: {:.3} s",
            event.sender_id,
            event.event_id,
            event.created_at.to_rfc3339(),
            self.hub,
            self.delivery.latency_secs
        )
    }
}

/// Consumer of received batches. No response is expected.
pub trait Renderer: Send + Sync {
    fn render(&self, batch: RenderedBatch);
}

/// Writes every delivery as a tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRenderer;

impl Renderer for LogRenderer {
    fn render(&self, batch: RenderedBatch) {
        for line in batch.lines() {
            info!(target: "hubcast::render", hub = %batch.hub, "{}", line);
        }
    }
}

/// Forwards batches to a channel for embedding or tests.
#[derive(Debug, Clone)]
pub struct ChannelRenderer {
    tx: mpsc::UnboundedSender<RenderedBatch>,
}

impl ChannelRenderer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RenderedBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Renderer for ChannelRenderer {
    fn render(&self, batch: RenderedBatch) {
        // A closed receiver only means nobody is watching any more.
        let _ = self.tx.send(batch);
    }
}
