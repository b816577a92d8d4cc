use std::time::Duration;

use super::*;
use crate::directory::StaticDirectory;
use crate::model::{Event, Notification};
use crate::runtime::SiloOptions;
use crate::test_utils::{batch, node};

fn client(
    cluster: &Arc<Cluster>,
) -> (
    SubscriptionClient,
    tokio::sync::mpsc::UnboundedReceiver<RenderedBatch>,
) {
    let (renderer, rx) = ChannelRenderer::new();
    let directory: Arc<dyn NodeDirectory> = cluster.clone();
    (
        SubscriptionClient::new(Arc::new(renderer), directory, Arc::clone(cluster)),
        rx,
    )
}

async fn observer_count(cluster: &Arc<Cluster>, port: u16) -> usize {
    cluster.hub(node(port)).observer_count().await.unwrap()
}

#[tokio::test]
async fn test_subscribe_all_covers_every_node() {
    let cluster = Cluster::new();
    for port in 1..=3 {
        cluster.join(node(port), SiloOptions::default()).await;
    }
    let (client, _rx) = client(&cluster);

    let report = client.subscribe_all().await.unwrap();

    assert_eq!(report, SubscribeReport { subscribed: 3, already_subscribed: 0 });
    for port in 1..=3 {
        assert_eq!(observer_count(&cluster, port).await, 1);
    }
}

#[tokio::test]
async fn test_subscribe_all_is_idempotent() {
    let cluster = Cluster::new();
    cluster.join(node(1), SiloOptions::default()).await;
    cluster.join(node(2), SiloOptions::default()).await;
    let (client, _rx) = client(&cluster);

    client.subscribe_all().await.unwrap();
    let report = client.subscribe_all().await.unwrap();

    assert_eq!(report, SubscribeReport { subscribed: 0, already_subscribed: 2 });
    assert_eq!(observer_count(&cluster, 1).await, 1);
    assert_eq!(observer_count(&cluster, 2).await, 1);
}

#[tokio::test]
async fn test_subscribe_all_picks_up_new_node() {
    let cluster = Cluster::new();
    cluster.join(node(1), SiloOptions::default()).await;
    let (client, _rx) = client(&cluster);
    client.subscribe_all().await.unwrap();

    cluster.join(node(2), SiloOptions::default()).await;
    let report = client.subscribe_all().await.unwrap();

    assert_eq!(report, SubscribeReport { subscribed: 1, already_subscribed: 1 });
    assert_eq!(observer_count(&cluster, 2).await, 1);
}

#[tokio::test]
async fn test_subscribe_all_heals_deactivated_hub() {
    let cluster = Cluster::new();
    let silo = cluster.join(node(1), SiloOptions::default()).await;
    let (client, _rx) = client(&cluster);
    client.subscribe_all().await.unwrap();

    silo.hub().await.unwrap().deactivate().await;
    assert_eq!(observer_count(&cluster, 1).await, 0);

    let report = client.subscribe_all().await.unwrap();
    assert_eq!(report.subscribed, 1);
    assert_eq!(observer_count(&cluster, 1).await, 1);
}

#[tokio::test]
async fn test_unreachable_node_aborts_pass() {
    let cluster = Cluster::new();
    cluster.join(node(2), SiloOptions::default()).await;
    let (renderer, _rx) = ChannelRenderer::new();
    // node(1) is listed but not hosted, and sorts first.
    let directory = Arc::new(StaticDirectory::new([node(1), node(2)]));
    let client = SubscriptionClient::new(Arc::new(renderer), directory, Arc::clone(&cluster));

    let err = client.subscribe_all().await.unwrap_err();

    match err {
        SubscribeError::Hub { address, source } => {
            assert_eq!(address, node(1));
            assert!(!source.is_already_subscribed());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(observer_count(&cluster, 2).await, 0);
}

#[tokio::test]
async fn test_unsubscribe_all() {
    let cluster = Cluster::new();
    cluster.join(node(1), SiloOptions::default()).await;
    cluster.join(node(2), SiloOptions::default()).await;
    let (client, _rx) = client(&cluster);
    client.subscribe_all().await.unwrap();

    assert_eq!(client.unsubscribe_all().await, 2);
    assert_eq!(client.unsubscribe_all().await, 0);
    assert_eq!(observer_count(&cluster, 1).await, 0);
}

#[tokio::test]
async fn test_observer_renders_received_batch() {
    let cluster = Cluster::new();
    cluster.join(node(1), SiloOptions::default()).await;
    let (client, mut rx) = client(&cluster);
    client.subscribe_all().await.unwrap();

    let report = cluster.hub(node(1)).publish(batch(&[4, 5])).await.unwrap();
    assert_eq!(report.delivered, 1);

    let rendered = rx.recv().await.unwrap();
    assert_eq!(rendered.hub, node(1).hub_id());
    let ids: Vec<_> = rendered
        .deliveries
        .iter()
        .map(|d| d.notification.event.event_id)
        .collect();
    assert_eq!(ids, vec![4, 5]);
}

#[tokio::test]
async fn test_observer_computes_latency_from_receipt() {
    let (renderer, mut rx) = ChannelRenderer::new();
    let observer = RelayObserver::new(Arc::new(renderer));
    let received = chrono::Utc::now() - chrono::Duration::seconds(2);
    let batch: Batch = vec![Notification::new(Event::new("1##x", 1, received), received)].into();

    observer.on(batch, &node(1).hub_id()).await.unwrap();

    let rendered = rx.recv().await.unwrap();
    let latency = rendered.deliveries[0].latency_secs;
    assert!((2.0..3.0).contains(&latency), "latency was {latency}");
}

#[tokio::test(start_paused = true)]
async fn test_resubscription_loop_heals_and_stops() {
    let cluster = Cluster::new();
    let silo = cluster.join(node(1), SiloOptions::default()).await;
    let (client, _rx) = client(&cluster);
    let client = Arc::new(client.with_resubscribe_interval(Duration::from_secs(10)));
    client.subscribe_all().await.unwrap();
    let handle = client.spawn_resubscription();

    silo.hub().await.unwrap().deactivate().await;
    assert_eq!(observer_count(&cluster, 1).await, 0);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(observer_count(&cluster, 1).await, 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_resubscription_loop_survives_failed_pass() {
    let cluster = Cluster::new();
    let (renderer, _rx) = ChannelRenderer::new();
    let directory = Arc::new(StaticDirectory::new([node(1)]));
    let client = Arc::new(
        SubscriptionClient::new(Arc::new(renderer), directory, Arc::clone(&cluster))
            .with_resubscribe_interval(Duration::from_secs(10)),
    );
    let handle = client.spawn_resubscription();

    // First pass fails: node(1) is not hosted yet.
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(!handle.is_finished());

    cluster.join(node(1), SiloOptions::default()).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(observer_count(&cluster, 1).await, 1);

    handle.stop();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(handle.is_finished());
}
