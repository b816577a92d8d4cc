//! Per-node actor host.
//!
//! Actors are addressed by derived identity. A lookup returns the live
//! activation for that identity or activates a fresh one, so a caller never
//! has to know whether the previous activation went idle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Cluster, HubRef, Result, SiloOptions, TransportError};
use crate::buffer::BufferHandle;
use crate::hub::HubHandle;
use crate::model::{BufferId, HubId, NodeAddress};

#[derive(Default)]
struct Activations {
    hub: Option<HubHandle>,
    buffers: HashMap<BufferId, BufferHandle>,
}

/// Hosts the hub and buffer actors of one node.
pub struct Silo {
    address: NodeAddress,
    hub_id: HubId,
    options: SiloOptions,
    cluster: Weak<Cluster>,
    activations: Mutex<Activations>,
    stopped: AtomicBool,
}

impl Silo {
    pub(crate) fn new(address: NodeAddress, options: SiloOptions, cluster: Weak<Cluster>) -> Self {
        Self {
            hub_id: address.hub_id(),
            address,
            options,
            cluster,
            activations: Mutex::new(Activations::default()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub fn hub_id(&self) -> &HubId {
        &self.hub_id
    }

    pub fn options(&self) -> &SiloOptions {
        &self.options
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Client stub for any node's hub, resolved through this node's cluster.
    pub fn hub_ref(&self, address: NodeAddress) -> HubRef {
        HubRef::new(address, self.cluster.clone())
    }

    /// The live hub activation, activating one if needed.
    pub async fn hub(&self) -> Result<HubHandle> {
        self.ensure_running()?;
        let mut activations = self.activations.lock().await;

        if let Some(hub) = activations.hub.as_ref().filter(|h| h.is_live()) {
            return Ok(hub.clone());
        }

        debug!(hub = %self.hub_id, "Activating hub");
        let hub = HubHandle::spawn(
            self.hub_id.clone(),
            self.options.idle_timeout,
            self.options.hub.clone(),
        );
        activations.hub = Some(hub.clone());
        Ok(hub)
    }

    /// The live buffer activation for `slot`, activating one if needed.
    pub async fn buffer(&self, slot: usize) -> Result<BufferHandle> {
        self.ensure_running()?;
        let id = self.buffer_id(slot);
        let mut activations = self.activations.lock().await;

        if let Some(buffer) = activations.buffers.get(&id).filter(|b| b.is_live()) {
            return Ok(buffer.clone());
        }

        debug!(buffer = %id, "Activating buffer");
        let buffer = BufferHandle::spawn(
            id.clone(),
            self.hub_ref(self.address),
            self.options.idle_timeout,
            self.options.buffer.clone(),
        );
        activations.buffers.insert(id, buffer.clone());
        Ok(buffer)
    }

    pub fn buffer_id(&self, slot: usize) -> BufferId {
        BufferId::new(self.hub_id.clone(), slot)
    }

    /// Number of live buffer activations.
    pub async fn live_buffers(&self) -> usize {
        let activations = self.activations.lock().await;
        activations.buffers.values().filter(|b| b.is_live()).count()
    }

    /// Stop accepting lookups and deactivate every hosted actor.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let activations = std::mem::take(&mut *self.activations.lock().await);
        let buffers = activations.buffers.len();

        for buffer in activations.buffers.values() {
            buffer.deactivate().await;
        }
        if let Some(hub) = activations.hub {
            hub.deactivate().await;
        }

        info!(node = %self.address, buffers = buffers, "Silo stopped");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(TransportError::NodeUnreachable(self.address));
        }
        Ok(())
    }
}
