//! Per-node routing facade.
//!
//! Owns the node's buffer pool and strategy, picks a buffer for every
//! incoming event and resolves hub identities for local and remote callers.

use std::sync::Arc;

use tracing::{debug, info};

use crate::balance::{LoadBalance, LoadBalanceKind};
use crate::buffer::Payload;
use crate::model::{BufferId, Event, HubId, NodeAddress, Notification};
use crate::runtime::{HubRef, Silo, TransportError};

/// Validated node bootstrap settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Number of buffer slots, numbered `1..=pool_size`.
    pub pool_size: usize,
    /// Slot selection policy.
    pub strategy: LoadBalanceKind,
}

/// Errors raised by the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Buffer pool size must be at least 1")]
    EmptyPool,

    #[error("Failed to activate {actor}: {source}")]
    Activation {
        actor: String,
        #[source]
        source: TransportError,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Routing facade for one node.
pub struct HubGateway {
    silo: Arc<Silo>,
    settings: GatewaySettings,
    balancer: Box<dyn LoadBalance>,
}

impl HubGateway {
    /// Activate the local hub, then every buffer slot in order.
    ///
    /// Fails on the first activation that does not come up, so a node never
    /// takes traffic with a partial pool.
    pub async fn init(silo: Arc<Silo>, settings: GatewaySettings) -> Result<Self, GatewayError> {
        if settings.pool_size == 0 {
            return Err(GatewayError::EmptyPool);
        }
        let timeout = silo.options().activation_timeout;

        let hub = silo.hub().await.map_err(|source| GatewayError::Activation {
            actor: silo.hub_id().to_string(),
            source,
        })?;
        hub.init(timeout).await.map_err(|source| GatewayError::Activation {
            actor: silo.hub_id().to_string(),
            source,
        })?;

        for slot in 1..=settings.pool_size {
            let activation = async {
                let buffer = silo.buffer(slot).await?;
                buffer.init(timeout).await
            };
            activation.await.map_err(|source| GatewayError::Activation {
                actor: silo.buffer_id(slot).to_string(),
                source,
            })?;
        }

        info!(
            node = %silo.address(),
            pool_size = settings.pool_size,
            strategy = %settings.strategy,
            "Gateway initialized"
        );

        Ok(Self {
            balancer: settings.strategy.build(1, settings.pool_size),
            silo,
            settings,
        })
    }

    pub fn settings(&self) -> GatewaySettings {
        self.settings
    }

    pub fn local_address(&self) -> NodeAddress {
        self.silo.address()
    }

    pub fn local_hub_id(&self) -> HubId {
        self.silo.hub_id().clone()
    }

    /// Reference to any node's hub. Pure derivation, no side effects.
    pub fn resolve_hub(&self, address: NodeAddress) -> HubRef {
        self.silo.hub_ref(address)
    }

    /// Reference to this node's hub.
    pub fn resolve_local_hub(&self) -> HubRef {
        self.resolve_hub(self.local_address())
    }

    /// Route one event to a buffer chosen by the strategy.
    ///
    /// Returns once the buffer has acknowledged the enqueue.
    pub async fn publish(&self, event: Event) -> Result<BufferId, GatewayError> {
        self.route(Payload::Event(event)).await
    }

    /// Route a batch of notifications to a single buffer.
    pub async fn publish_batch(
        &self,
        notifications: Vec<Notification>,
    ) -> Result<BufferId, GatewayError> {
        self.route(Payload::Notifications(notifications)).await
    }

    async fn route(&self, payload: Payload) -> Result<BufferId, GatewayError> {
        let slot = self.balancer.acquire();
        let buffer = self.silo.buffer(slot).await?;

        let queued = match buffer.enqueue(payload.clone()).await {
            Ok(queued) => queued,
            // The activation went idle between lookup and call; the silo
            // hands out a fresh one. Delivery is at-least-once.
            Err(TransportError::ActorUnavailable(_)) => {
                self.silo.buffer(slot).await?.enqueue(payload).await?
            }
            Err(e) => return Err(e.into()),
        };

        debug!(buffer = %buffer.id(), queued = queued, "Routed to buffer");
        Ok(buffer.id().clone())
    }
}
