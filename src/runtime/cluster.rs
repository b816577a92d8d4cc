//! In-process cluster: transport and membership across silos.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;
use tracing::info;

use super::{Result, Silo, SiloOptions, TransportError};
use crate::hub::{FanOutReport, HubError, HubHandle, HubObserver, ObserverId};
use crate::model::{Batch, HubId, NodeAddress};

/// Set of nodes reachable from this process.
#[derive(Default)]
pub struct Cluster {
    silos: RwLock<HashMap<NodeAddress, Arc<Silo>>>,
}

impl Cluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start hosting a node. Joining an address twice returns the existing silo.
    pub async fn join(self: &Arc<Self>, address: NodeAddress, options: SiloOptions) -> Arc<Silo> {
        let mut silos = self.silos.write().await;
        if let Some(silo) = silos.get(&address) {
            return Arc::clone(silo);
        }

        let silo = Arc::new(Silo::new(address, options, Arc::downgrade(self)));
        silos.insert(address, Arc::clone(&silo));
        info!(node = %address, hub = %silo.hub_id(), members = silos.len(), "Node joined");
        silo
    }

    /// Stop a node. Its hub and buffers become unreachable.
    pub async fn leave(&self, address: &NodeAddress) -> bool {
        let silo = self.silos.write().await.remove(address);
        match silo {
            Some(silo) => {
                silo.shutdown().await;
                info!(node = %address, "Node left");
                true
            }
            None => false,
        }
    }

    pub async fn silo(&self, address: &NodeAddress) -> Result<Arc<Silo>> {
        self.silos
            .read()
            .await
            .get(address)
            .cloned()
            .ok_or(TransportError::NodeUnreachable(*address))
    }

    /// Addresses of every hosted node, sorted.
    pub async fn members(&self) -> Vec<NodeAddress> {
        let mut members: Vec<_> = self.silos.read().await.keys().copied().collect();
        members.sort();
        members
    }

    /// Client stub for a node's hub.
    pub fn hub(self: &Arc<Self>, address: NodeAddress) -> HubRef {
        HubRef::new(address, Arc::downgrade(self))
    }

    /// Stop every node.
    pub async fn shutdown(&self) {
        let silos: Vec<_> = self.silos.write().await.drain().map(|(_, s)| s).collect();
        for silo in silos {
            silo.shutdown().await;
        }
    }
}

/// Location-transparent reference to a node's hub.
///
/// Each call resolves the owning node and its current hub activation, so a
/// hub that deactivated and came back is reached without the caller noticing.
#[derive(Clone)]
pub struct HubRef {
    address: NodeAddress,
    hub_id: HubId,
    cluster: Weak<Cluster>,
}

impl HubRef {
    pub(crate) fn new(address: NodeAddress, cluster: Weak<Cluster>) -> Self {
        Self {
            hub_id: address.hub_id(),
            address,
            cluster,
        }
    }

    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub fn hub_id(&self) -> &HubId {
        &self.hub_id
    }

    pub async fn subscribe(
        &self,
        observer: Arc<dyn HubObserver>,
    ) -> std::result::Result<(), HubError> {
        self.activation().await?.subscribe(observer).await
    }

    pub async fn unsubscribe(&self, id: ObserverId) -> std::result::Result<bool, HubError> {
        self.activation().await?.unsubscribe(id).await
    }

    pub async fn publish(&self, batch: Batch) -> std::result::Result<FanOutReport, HubError> {
        self.activation().await?.publish(batch).await
    }

    pub async fn observer_count(&self) -> std::result::Result<usize, HubError> {
        self.activation().await?.observer_count().await
    }

    async fn activation(&self) -> Result<HubHandle> {
        let cluster = self
            .cluster
            .upgrade()
            .ok_or(TransportError::NodeUnreachable(self.address))?;
        cluster.silo(&self.address).await?.hub().await
    }
}

impl std::fmt::Debug for HubRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubRef")
            .field("address", &self.address)
            .field("hub_id", &self.hub_id)
            .finish()
    }
}
