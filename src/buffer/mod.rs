//! Per-slot buffer actor.
//!
//! Batches notifications on their way to the local hub. On activation a
//! buffer resolves its node's hub, starts with an empty queue and registers
//! two timers:
//! - flush: swap the queue for an empty one and publish the old contents as
//!   one batch
//! - keep-alive: push the idle-deactivation deadline out by the keep-alive
//!   period so the buffer stays resident through quiet stretches
//!
//! The first keep-alive period is granted at activation, so a keep-alive
//! longer than the idle timeout still holds the buffer. A zero keep-alive
//! leaves only idle deactivation.
//!
//! The queue is unbounded. A batch above `warn_batch_size` is logged so a
//! stalled flush shows up before memory does.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::hub::{FanOutReport, HubError};
use crate::model::{Batch, BufferId, Event, Notification};
use crate::runtime::{
    activation_state, await_activation, ActivationState, BufferOptions, HubRef, IdleDeadline,
    TransportError,
};

/// Payload accepted by `enqueue`.
#[derive(Debug, Clone)]
pub enum Payload {
    /// A raw event, stamped with the receipt time when it reaches the buffer.
    Event(Event),
    /// Notifications that already carry a receipt time.
    Notifications(Vec<Notification>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Self::Event(_) => 1,
            Self::Notifications(n) => n.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Event> for Payload {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}

impl From<Vec<Notification>> for Payload {
    fn from(notifications: Vec<Notification>) -> Self {
        Self::Notifications(notifications)
    }
}

/// What one flush did with the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Queue was empty; nothing was published.
    Empty,
    /// The batch reached the hub.
    Published { size: usize, report: FanOutReport },
    /// The hub could not be reached; the batch is gone.
    Dropped { size: usize, error: HubError },
}

enum BufferMessage {
    Init {
        reply: oneshot::Sender<()>,
    },
    Enqueue {
        payload: Payload,
        reply: oneshot::Sender<usize>,
    },
    Flush {
        reply: oneshot::Sender<FlushOutcome>,
    },
    Deactivate,
}

/// Handle to one buffer activation.
#[derive(Clone)]
pub struct BufferHandle {
    id: BufferId,
    tx: mpsc::UnboundedSender<BufferMessage>,
    state: watch::Receiver<ActivationState>,
}

impl BufferHandle {
    /// Activate a buffer publishing to `hub`.
    pub fn spawn(
        id: BufferId,
        hub: HubRef,
        idle_timeout: Duration,
        options: BufferOptions,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = activation_state();

        let actor = BufferActor {
            id: id.clone(),
            hub,
            queue: Vec::new(),
            idle: IdleDeadline::new(idle_timeout),
            options,
            state: state_tx,
        };
        tokio::spawn(actor.run(rx));

        Self { id, tx, state }
    }

    pub fn id(&self) -> &BufferId {
        &self.id
    }

    pub fn state(&self) -> ActivationState {
        *self.state.borrow()
    }

    /// Whether calls can still reach this activation.
    pub fn is_live(&self) -> bool {
        !self.tx.is_closed() && self.state() != ActivationState::Deactivated
    }

    /// Wait until the activation is `Active`.
    pub async fn init(&self, timeout: Duration) -> Result<(), TransportError> {
        let mut state = self.state.clone();
        await_activation(&mut state, &self.id.to_string(), timeout).await?;
        self.call(|reply| BufferMessage::Init { reply }).await
    }

    /// Append to the tail of the queue.
    ///
    /// Returns the queue length after the append, once the buffer has
    /// acknowledged. Never waits for a flush.
    pub async fn enqueue(&self, payload: impl Into<Payload>) -> Result<usize, TransportError> {
        let payload = payload.into();
        self.call(|reply| BufferMessage::Enqueue { payload, reply })
            .await
    }

    /// Flush now instead of waiting for the timer, and wait for the dispatch.
    pub async fn flush(&self) -> Result<FlushOutcome, TransportError> {
        self.call(|reply| BufferMessage::Flush { reply }).await
    }

    /// Deactivate and wait for the activation to end.
    pub async fn deactivate(&self) {
        let _ = self.tx.send(BufferMessage::Deactivate);
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == ActivationState::Deactivated).await;
    }

    async fn call<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> BufferMessage,
    ) -> Result<T, TransportError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(message(reply))
            .map_err(|_| self.unavailable())?;
        response.await.map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> TransportError {
        TransportError::ActorUnavailable(self.id.to_string())
    }
}

struct BufferActor {
    id: BufferId,
    hub: HubRef,
    queue: Vec<Notification>,
    idle: IdleDeadline,
    options: BufferOptions,
    state: watch::Sender<ActivationState>,
}

impl BufferActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<BufferMessage>) {
        let _ = self.state.send(ActivationState::Active);
        info!(
            buffer = %self.id,
            flush_interval = ?self.options.flush_interval,
            keep_alive = ?self.options.keep_alive,
            "Buffer activated"
        );

        let now = Instant::now();
        let mut flush = interval_at(now + self.options.flush_interval, self.options.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // A zero period disables keep-alive; the interval is then never polled.
        let keep_alive_period = self.options.keep_alive;
        let keep_alive_enabled = !keep_alive_period.is_zero();
        let mut keep_alive = interval_at(
            now + keep_alive_period,
            keep_alive_period.max(Duration::from_millis(1)),
        );
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if keep_alive_enabled {
            // Resident for one full period before the first tick renews it.
            self.idle.delay(keep_alive_period);
        }

        let idle = sleep_until(self.idle.deadline());
        tokio::pin!(idle);

        loop {
            // Keep-alive is polled before idle: a tick due at the deadline wins.
            tokio::select! {
                biased;

                message = rx.recv() => {
                    let Some(message) = message else { break };
                    self.idle.touch();
                    idle.as_mut().reset(self.idle.deadline());
                    if !self.handle(message) {
                        break;
                    }
                }
                _ = flush.tick() => self.flush(None),
                _ = keep_alive.tick(), if keep_alive_enabled => {
                    self.idle.delay(keep_alive_period);
                    idle.as_mut().reset(self.idle.deadline());
                    debug!(buffer = %self.id, "Buffer keep-alive");
                }
                _ = &mut idle => {
                    info!(buffer = %self.id, "Buffer idle, deactivating");
                    break;
                }
            }
        }

        // Hand off whatever is still queued before the activation ends.
        self.flush(None);
        let _ = self.state.send(ActivationState::Deactivated);
        info!(buffer = %self.id, "Buffer deactivated");
    }

    /// Returns false when the activation should end.
    fn handle(&mut self, message: BufferMessage) -> bool {
        match message {
            BufferMessage::Init { reply } => {
                let _ = reply.send(());
            }
            BufferMessage::Enqueue { payload, reply } => {
                self.enqueue(payload);
                let _ = reply.send(self.queue.len());
            }
            BufferMessage::Flush { reply } => self.flush(Some(reply)),
            BufferMessage::Deactivate => return false,
        }
        true
    }

    fn enqueue(&mut self, payload: Payload) {
        match payload {
            Payload::Event(event) => self.queue.push(Notification::received_now(event)),
            Payload::Notifications(notifications) => self.queue.extend(notifications),
        }
    }

    /// Swap the queue out and publish it as one batch.
    ///
    /// The swap happens before the hub call is issued, so anything enqueued
    /// while the call is in flight lands in the next batch.
    fn flush(&mut self, reply: Option<oneshot::Sender<FlushOutcome>>) {
        if self.queue.is_empty() {
            if let Some(reply) = reply {
                let _ = reply.send(FlushOutcome::Empty);
            }
            return;
        }

        let batch: Batch = std::mem::take(&mut self.queue).into();
        let size = batch.len();
        if size > self.options.warn_batch_size {
            warn!(
                buffer = %self.id,
                size = size,
                threshold = self.options.warn_batch_size,
                "Flush batch exceeds threshold, hub may be falling behind"
            );
        }

        let hub = self.hub.clone();
        let buffer = self.id.clone();
        tokio::spawn(async move {
            let outcome = dispatch(&hub, &buffer, batch).await;
            if let Some(reply) = reply {
                let _ = reply.send(outcome);
            }
        });
    }
}

/// Publish one batch to the hub. Failures are absorbed: no redelivery.
#[tracing::instrument(
    name = "buffer.flush",
    skip_all,
    fields(buffer = %buffer, size = batch.len())
)]
async fn dispatch(hub: &HubRef, buffer: &BufferId, batch: Batch) -> FlushOutcome {
    let size = batch.len();
    match hub.publish(batch).await {
        Ok(report) => {
            debug!(
                delivered = report.delivered,
                failed = report.failed,
                "Batch flushed"
            );
            FlushOutcome::Published { size, report }
        }
        Err(error) => {
            warn!(hub = %hub.hub_id(), error = %error, "Flush failed, batch dropped");
            FlushOutcome::Dropped { size, error }
        }
    }
}
