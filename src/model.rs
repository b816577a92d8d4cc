//! Relay data model.
//!
//! Identities are derived deterministically from node addresses so that any
//! party can address a node's hub or buffers without a lookup service:
//! - `HubId` = `"HUB" + address`
//! - `BufferId` = `HubId + ":<-" + slot`

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of every hub identity.
pub const HUB_ID_PREFIX: &str = "HUB";

/// Separator between a hub identity and a buffer slot.
const BUFFER_SLOT_SEPARATOR: &str = ":<-";

/// Network endpoint identifying a cluster member.
///
/// Stable for the lifetime of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress(SocketAddr);

impl NodeAddress {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Identity of this node's hub actor.
    pub fn hub_id(&self) -> HubId {
        HubId::for_node(self)
    }
}

impl From<SocketAddr> for NodeAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl FromStr for NodeAddress {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<SocketAddr>().map(Self)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a node's hub actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HubId(String);

impl HubId {
    /// Derive the hub identity for a node.
    ///
    /// Pure: equal addresses always yield equal ids, distinct addresses never
    /// collide because the full endpoint (ip and port) is embedded.
    pub fn for_node(address: &NodeAddress) -> Self {
        Self(format!("{}{}", HUB_ID_PREFIX, address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one buffer slot on one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId {
    hub: HubId,
    slot: usize,
}

impl BufferId {
    pub fn new(hub: HubId, slot: usize) -> Self {
        Self { hub, slot }
    }

    pub fn hub(&self) -> &HubId {
        &self.hub
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.hub, BUFFER_SLOT_SEPARATOR, self.slot)
    }
}

/// A timestamped event produced on some node.
///
/// `event_id` is not guaranteed to be globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub sender_id: String,
    pub event_id: i64,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(sender_id: impl Into<String>, event_id: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            sender_id: sender_id.into(),
            event_id,
            created_at,
        }
    }
}

/// An event wrapped with the time a buffer received it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub event: Event,
    pub received_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(event: Event, received_at: DateTime<Utc>) -> Self {
        Self { event, received_at }
    }

    /// Wrap an event, stamping it with the current time.
    pub fn received_now(event: Event) -> Self {
        Self::new(event, Utc::now())
    }

    /// Time elapsed between receipt and `now`, in seconds.
    ///
    /// Negative when clocks disagree across nodes.
    pub fn latency_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.received_at)
            .num_microseconds()
            .map(|us| us as f64 / 1_000_000.0)
            .unwrap_or(f64::MAX)
    }
}

/// One flushed batch. Shared read-only across every observer of a fan-out.
pub type Batch = Arc<[Notification]>;
