//! hubcast-cluster: in-process relay cluster
//!
//! Hosts every configured node in one process, starts a gateway per node,
//! drives them with synthetic publishers and renders everything through a
//! single cluster-wide subscription client.
//!
//! ## Configuration
//! ```yaml
//! node:
//!   pool_size: 4
//!   load_balance: RoundRobin
//! publisher:
//!   count: 20
//! cluster:
//!   nodes:
//!     - "127.0.0.1:11111"
//!     - "127.0.0.1:11112"
//! ```

use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tracing::{info, warn};

use hubcast::config::Config;
use hubcast::directory::NodeDirectory;
use hubcast::gateway::HubGateway;
use hubcast::model::NodeAddress;
use hubcast::observer::{LogRenderer, SubscribeError, SubscriptionClient};
use hubcast::publisher::spawn_publishers;
use hubcast::runtime::Cluster;
use hubcast::utils::bootstrap::{init_tracing, shutdown_signal};
use hubcast::utils::retry::{is_retryable_subscribe, startup_backoff};

/// Node hosted when `cluster.nodes` is empty.
const DEFAULT_NODE: &str = "127.0.0.1:11111";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    let settings = config.node_settings()?;
    let publisher_options = config.publisher_options()?;
    let silo_options = config.silo_options();

    let mut nodes = config.cluster_nodes()?;
    if nodes.is_empty() {
        warn!(node = DEFAULT_NODE, "No cluster.nodes configured, hosting default node");
        nodes.push(DEFAULT_NODE.parse::<NodeAddress>()?);
    }

    let cluster = Cluster::new();
    let mut gateways = Vec::with_capacity(nodes.len());
    for address in &nodes {
        let silo = cluster.join(*address, silo_options.clone()).await;
        gateways.push(Arc::new(HubGateway::init(silo, settings).await?));
    }

    let directory: Arc<dyn NodeDirectory> = cluster.clone();
    let client = Arc::new(
        SubscriptionClient::new(Arc::new(LogRenderer), directory, Arc::clone(&cluster))
            .with_resubscribe_interval(config.resubscribe_interval()),
    );

    (|| {
        let client = Arc::clone(&client);
        async move { client.subscribe_all().await }
    })
    .retry(startup_backoff())
    .when(is_retryable_subscribe)
    .notify(|err: &SubscribeError, dur: Duration| {
        warn!(error = %err, delay = ?dur, "Initial subscription failed, retrying");
    })
    .await?;
    let resubscription = client.spawn_resubscription();

    let publishers = spawn_publishers(config.publisher.count, &gateways, &publisher_options);

    info!(
        nodes = nodes.len(),
        pool_size = settings.pool_size,
        strategy = %settings.strategy,
        publishers = publishers.len(),
        "hubcast-cluster started"
    );

    shutdown_signal().await;

    resubscription.shutdown().await;
    for publisher in publishers {
        publisher.stop().await;
    }
    client.unsubscribe_all().await;
    cluster.shutdown().await;

    info!("hubcast-cluster stopped");
    Ok(())
}
