//! Cluster membership.
//!
//! The subscription client only needs "which nodes are active right now".
//! Two sources are provided:
//! - `Cluster`: the nodes hosted by the in-process transport
//! - `StaticDirectory`: a fixed list, set programmatically or from
//!   `HUBCAST_NODES`
//!
//! ```bash
//! HUBCAST_NODES=10.0.0.1:11111,10.0.0.2:11111
//! ```

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::model::NodeAddress;
use crate::runtime::Cluster;

/// Environment variable listing node addresses for static membership.
pub const NODES_ENV_VAR: &str = "HUBCAST_NODES";

/// Errors raised while listing members.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Membership unavailable: {0}")]
    Unavailable(String),
}

/// Source of currently active node addresses.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    async fn active_nodes(&self) -> Result<Vec<NodeAddress>, DirectoryError>;
}

#[async_trait]
impl NodeDirectory for Cluster {
    async fn active_nodes(&self) -> Result<Vec<NodeAddress>, DirectoryError> {
        Ok(self.members().await)
    }
}

/// Fixed membership list.
#[derive(Default)]
pub struct StaticDirectory {
    nodes: RwLock<Vec<NodeAddress>>,
}

impl StaticDirectory {
    pub fn new(nodes: impl IntoIterator<Item = NodeAddress>) -> Self {
        let mut nodes: Vec<_> = nodes.into_iter().collect();
        nodes.sort();
        nodes.dedup();
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Create from `HUBCAST_NODES`. Unparseable entries are skipped.
    pub fn from_env() -> Self {
        let nodes = std::env::var(NODES_ENV_VAR)
            .map(|raw| parse_node_list(&raw))
            .unwrap_or_default();
        info!(nodes = nodes.len(), "Static directory initialized from environment");
        Self::new(nodes)
    }

    pub async fn add(&self, address: NodeAddress) {
        let mut nodes = self.nodes.write().await;
        if !nodes.contains(&address) {
            nodes.push(address);
            nodes.sort();
        }
    }

    pub async fn remove(&self, address: &NodeAddress) -> bool {
        let mut nodes = self.nodes.write().await;
        let before = nodes.len();
        nodes.retain(|n| n != address);
        nodes.len() != before
    }
}

#[async_trait]
impl NodeDirectory for StaticDirectory {
    async fn active_nodes(&self) -> Result<Vec<NodeAddress>, DirectoryError> {
        Ok(self.nodes.read().await.clone())
    }
}

/// Parse a comma-separated address list, skipping bad entries.
pub fn parse_node_list(raw: &str) -> Vec<NodeAddress> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<NodeAddress>() {
            Ok(address) => Some(address),
            Err(e) => {
                warn!(entry = %s, error = %e, "Failed to parse node address");
                None
            }
        })
        .collect()
}
