//! Actor hosting.
//!
//! Every actor is a spawned task that owns its state and drains an unbounded
//! mailbox; requests carry a oneshot reply. Handlers that call other actors
//! spawn the downstream call so the mailbox keeps draining (reentrant actors).
//!
//! - `Silo`: per-node host, looks up or lazily activates actors by identity
//! - `Cluster`: in-process transport and membership across silos
//! - `HubRef`: location-transparent client stub for a node's hub

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::model::NodeAddress;

pub mod cluster;
pub mod silo;

pub use cluster::{Cluster, HubRef};
pub use silo::Silo;

/// Default flush period of buffer actors.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
/// Default keep-alive period of buffer actors.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(12 * 60 * 60);
/// Default idle time before an actor deactivates.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
/// Default bound on waiting for an actor to become active.
pub const DEFAULT_ACTIVATION_TIMEOUT: Duration = Duration::from_secs(5);
/// Default bound on a single observer call during fan-out.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
/// Default batch size above which a flush logs a warning.
pub const DEFAULT_WARN_BATCH_SIZE: usize = 10_000;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised while reaching an actor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Node {0} is unreachable")]
    NodeUnreachable(NodeAddress),

    #[error("Actor '{0}' is unavailable")]
    ActorUnavailable(String),

    #[error("Actor '{actor}' did not activate within {timeout:?}")]
    ActivationTimeout { actor: String, timeout: Duration },
}

/// Lifecycle of one actor activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Uninitialized,
    Active,
    Deactivated,
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Channel an actor task uses to publish its lifecycle to handles.
pub(crate) fn activation_state() -> (
    watch::Sender<ActivationState>,
    watch::Receiver<ActivationState>,
) {
    watch::channel(ActivationState::Uninitialized)
}

/// Wait until an activation has left `Uninitialized`.
pub(crate) async fn await_activation(
    state: &mut watch::Receiver<ActivationState>,
    actor: &str,
    timeout: Duration,
) -> Result<()> {
    let waited = tokio::time::timeout(
        timeout,
        state.wait_for(|s| *s != ActivationState::Uninitialized),
    )
    .await;

    match waited {
        Ok(Ok(s)) if *s == ActivationState::Active => Ok(()),
        Ok(_) => Err(TransportError::ActorUnavailable(actor.to_string())),
        Err(_) => Err(TransportError::ActivationTimeout {
            actor: actor.to_string(),
            timeout,
        }),
    }
}

/// Idle-deactivation deadline of an activation.
#[derive(Debug, Clone)]
pub(crate) struct IdleDeadline {
    idle_timeout: Duration,
    deadline: Instant,
}

impl IdleDeadline {
    pub(crate) fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            deadline: Instant::now() + idle_timeout,
        }
    }

    /// Record activity. Never shortens a deadline extended by `delay`.
    pub(crate) fn touch(&mut self) {
        self.extend_to(Instant::now() + self.idle_timeout);
    }

    /// Keep the activation resident for at least `period` from now.
    pub(crate) fn delay(&mut self, period: Duration) {
        self.extend_to(Instant::now() + period);
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    fn extend_to(&mut self, candidate: Instant) {
        if candidate > self.deadline {
            self.deadline = candidate;
        }
    }
}

/// Timing knobs for buffer actors.
#[derive(Debug, Clone)]
pub struct BufferOptions {
    /// Period of the flush timer.
    pub flush_interval: Duration,
    /// Period of the keep-alive timer, also the extension it grants. Zero disables it.
    pub keep_alive: Duration,
    /// Batch size above which a flush logs a warning.
    pub warn_batch_size: usize,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            keep_alive: DEFAULT_KEEP_ALIVE,
            warn_batch_size: DEFAULT_WARN_BATCH_SIZE,
        }
    }
}

/// Timing knobs for hub actors.
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Upper bound on one observer's receive call.
    pub delivery_timeout: Duration,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

/// Options for every actor hosted by a silo.
#[derive(Debug, Clone)]
pub struct SiloOptions {
    pub idle_timeout: Duration,
    pub activation_timeout: Duration,
    pub buffer: BufferOptions,
    pub hub: HubOptions,
}

impl Default for SiloOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            activation_timeout: DEFAULT_ACTIVATION_TIMEOUT,
            buffer: BufferOptions::default(),
            hub: HubOptions::default(),
        }
    }
}
