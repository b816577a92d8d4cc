use super::*;
use crate::runtime::DEFAULT_IDLE_TIMEOUT;
use crate::test_utils::{
    batch, node, FailingObserver, PanickingObserver, RecordingObserver, SlowObserver,
};

fn spawn_hub() -> HubHandle {
    HubHandle::spawn(node(11111).hub_id(), DEFAULT_IDLE_TIMEOUT, HubOptions::default())
}

#[tokio::test]
async fn test_init_reaches_active() {
    let hub = spawn_hub();
    hub.init(Duration::from_secs(1)).await.unwrap();
    assert_eq!(hub.state(), ActivationState::Active);
    assert!(hub.is_live());
}

#[tokio::test]
async fn test_subscribe_twice_is_rejected() {
    let hub = spawn_hub();
    let observer = RecordingObserver::new();

    hub.subscribe(observer.clone()).await.unwrap();
    let err = hub.subscribe(observer.clone()).await.unwrap_err();

    assert_eq!(err, HubError::AlreadySubscribed(observer.id()));
    assert!(err.is_already_subscribed());
    assert_eq!(hub.observer_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unsubscribe_absent_is_noop() {
    let hub = spawn_hub();
    let observer = RecordingObserver::new();
    hub.subscribe(observer.clone()).await.unwrap();

    assert!(!hub.unsubscribe(ObserverId::new()).await.unwrap());
    assert_eq!(hub.observer_count().await.unwrap(), 1);

    assert!(hub.unsubscribe(observer.id()).await.unwrap());
    assert_eq!(hub.observer_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_publish_reaches_every_observer() {
    let hub = spawn_hub();
    let first = RecordingObserver::new();
    let second = RecordingObserver::new();
    hub.subscribe(first.clone()).await.unwrap();
    hub.subscribe(second.clone()).await.unwrap();

    let report = hub.publish(batch(&[1, 2])).await.unwrap();

    assert_eq!(report, FanOutReport { delivered: 2, failed: 0 });
    for observer in [&first, &second] {
        let batches = observer.batches().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(&batches[0].0, hub.hub_id());
        assert_eq!(observer.event_ids().await, vec![1, 2]);
    }
}

#[tokio::test]
async fn test_publish_without_observers_is_noop() {
    let hub = spawn_hub();
    let report = hub.publish(batch(&[1])).await.unwrap();
    assert_eq!(report, FanOutReport::default());
}

#[tokio::test]
async fn test_failing_observer_does_not_block_others() {
    let hub = spawn_hub();
    let healthy = RecordingObserver::new();
    hub.subscribe(FailingObserver::new()).await.unwrap();
    hub.subscribe(healthy.clone()).await.unwrap();

    let report = hub.publish(batch(&[7])).await.unwrap();

    assert_eq!(report, FanOutReport { delivered: 1, failed: 1 });
    assert_eq!(healthy.event_ids().await, vec![7]);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_observer_does_not_block_others() {
    let hub = spawn_hub();
    let slow = SlowObserver::new(Duration::from_millis(50));
    let healthy = RecordingObserver::new();
    hub.subscribe(PanickingObserver::new()).await.unwrap();
    hub.subscribe(slow.clone()).await.unwrap();
    hub.subscribe(healthy.clone()).await.unwrap();

    let report = hub.publish(batch(&[1])).await.unwrap();

    assert_eq!(report, FanOutReport { delivered: 2, failed: 1 });
    assert_eq!(slow.recorded().event_ids().await, vec![1]);
    assert_eq!(healthy.event_ids().await, vec![1]);

    // The hub itself keeps serving.
    assert!(hub.is_live());
    assert_eq!(hub.observer_count().await.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_slow_observer_times_out() {
    let hub = HubHandle::spawn(
        node(11111).hub_id(),
        DEFAULT_IDLE_TIMEOUT,
        HubOptions {
            delivery_timeout: Duration::from_millis(100),
        },
    );
    let slow = SlowObserver::new(Duration::from_secs(10));
    let healthy = RecordingObserver::new();
    hub.subscribe(slow.clone()).await.unwrap();
    hub.subscribe(healthy.clone()).await.unwrap();

    let report = hub.publish(batch(&[1])).await.unwrap();

    assert_eq!(report, FanOutReport { delivered: 1, failed: 1 });
    assert_eq!(slow.recorded().batch_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_hub_serves_calls_during_fan_out() {
    let hub = spawn_hub();
    hub.subscribe(SlowObserver::new(Duration::from_secs(1)))
        .await
        .unwrap();

    let publishing = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.publish(batch(&[1])).await })
    };
    tokio::task::yield_now().await;

    // A subscribe issued while the fan-out is pending must not wait for it.
    let late = RecordingObserver::new();
    hub.subscribe(late.clone()).await.unwrap();
    assert_eq!(hub.observer_count().await.unwrap(), 2);
    assert!(!publishing.is_finished());

    let report = publishing.await.unwrap().unwrap();
    assert!(report.delivered >= 1);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_deactivate_discards_registry() {
    let hub = spawn_hub();
    hub.subscribe(RecordingObserver::new()).await.unwrap();

    hub.deactivate().await;

    assert_eq!(hub.state(), ActivationState::Deactivated);
    assert!(!hub.is_live());
    let err = hub.observer_count().await.unwrap_err();
    assert!(matches!(
        err,
        HubError::Transport(TransportError::ActorUnavailable(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_idle_hub_deactivates() {
    let hub = HubHandle::spawn(
        node(11111).hub_id(),
        Duration::from_secs(60),
        HubOptions::default(),
    );
    hub.init(Duration::from_secs(1)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(hub.is_live());
    hub.observer_count().await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(hub.state(), ActivationState::Deactivated);
}
