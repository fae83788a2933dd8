//! Session worker against the mock broker: connect, retry, resubscribe, report

use deskclock_devkit::{MockBroker, RecordingActuators};
use deskclock_link::command::Topics;
use deskclock_link::dispatch::CommandDispatcher;
use deskclock_link::publisher::TelemetryPublisher;
use deskclock_link::session::{
    BrokerSession, SessionStats, SessionStatus, SessionTiming, SessionWorker,
};
use deskclock_link::telemetry::{SharedTelemetry, TelemetryStore};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

const ROOT: &str = "$oc/devices/test";

struct Rig {
    broker: MockBroker,
    topics: Topics,
    store: SharedTelemetry,
    stats: SessionStats,
    link: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<MockBroker>,
}

impl Rig {
    fn start(broker: MockBroker, link_up: bool) -> Self {
        let topics = Topics::new(ROOT);
        let store = TelemetryStore::shared();
        let dispatcher = CommandDispatcher::new(topics.clone(), RecordingActuators::new().hub());
        let publisher = TelemetryPublisher::new(&topics, "Property");
        let (link, link_rx) = watch::channel(link_up);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = SessionWorker::new(
            broker.clone(),
            dispatcher,
            publisher,
            store.clone(),
            link_rx,
            SessionTiming::default(),
        );
        let stats = worker.stats();
        let worker = tokio::spawn(worker.run(shutdown_rx));

        Self {
            broker,
            topics,
            store,
            stats,
            link,
            shutdown,
            worker,
        }
    }

    fn report_times(&self) -> Vec<u64> {
        self.broker
            .json_messages(&self.topics.report)
            .unwrap()
            .iter()
            .map(|report: &Value| report["services"][0]["properties"]["Time"].as_u64().unwrap())
            .collect()
    }

    async fn stop(self) -> MockBroker {
        self.shutdown.send(true).unwrap();
        self.worker.await.unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn test_connects_and_subscribes_to_commands_and_downstream() {
    let rig = Rig::start(MockBroker::new(), true);
    sleep(Duration::from_millis(50)).await;

    assert!(rig.broker.get_subscriptions().contains(&format!("{ROOT}/sys/commands/#")));
    assert!(rig.broker.get_subscriptions().contains(&format!("{ROOT}/sys/messages/down")));
    assert_eq!(rig.stats.status(), SessionStatus::Connected);
    assert_eq!(rig.stats.snapshot().connects, 1);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_refused_connect_retries_every_three_seconds() {
    let broker = MockBroker::new();
    broker.refuse_next_connects(2);
    let rig = Rig::start(broker, true);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(rig.broker.connect_attempts(), 1);
    assert_eq!(rig.stats.status(), SessionStatus::Disconnected);

    sleep(Duration::from_millis(2800)).await;
    assert_eq!(rig.broker.connect_attempts(), 1);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(rig.broker.connect_attempts(), 2);
    assert!(rig.broker.get_subscriptions().is_empty());

    sleep(Duration::from_secs(3)).await;
    assert_eq!(rig.broker.connect_attempts(), 3);
    assert_eq!(rig.stats.status(), SessionStatus::Connected);
    assert_eq!(rig.broker.get_subscriptions().len(), 2);

    let snapshot = rig.stats.snapshot();
    assert_eq!(snapshot.connect_attempts, 3);
    assert_eq!(snapshot.connects, 1);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_never_gives_up_on_the_broker() {
    let broker = MockBroker::new();
    broker.refuse_next_connects(u32::MAX);
    let rig = Rig::start(broker, true);

    sleep(Duration::from_secs(10 * 60)).await;
    assert!(rig.broker.connect_attempts() >= 200);
    assert_eq!(rig.stats.status(), SessionStatus::Disconnected);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_resubscribes_after_connection_drop() {
    let rig = Rig::start(MockBroker::new(), true);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(rig.broker.get_subscriptions().len(), 2);

    rig.broker.drop_connection();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(rig.broker.connect_attempts(), 2);
    let subscriptions = rig.broker.get_subscriptions();
    assert_eq!(subscriptions.len(), 4);
    assert_eq!(subscriptions[0], subscriptions[2]);
    assert_eq!(subscriptions[1], subscriptions[3]);
    assert_eq!(rig.stats.snapshot().reconnects, 1);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_subscribe_forces_reconnect_and_resubscribe() {
    let broker = MockBroker::new();
    broker.refuse_next_subscribes(1);
    let rig = Rig::start(broker, true);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(rig.broker.connect_attempts(), 1);
    assert!(!rig.broker.is_connected());
    assert!(rig.broker.get_subscriptions().is_empty());
    assert_eq!(rig.stats.status(), SessionStatus::Disconnected);
    assert_eq!(rig.stats.snapshot().connects, 0);

    sleep(Duration::from_millis(3100)).await;
    assert_eq!(rig.broker.connect_attempts(), 2);
    assert_eq!(
        rig.broker.get_subscriptions(),
        vec![format!("{ROOT}/sys/commands/#"), format!("{ROOT}/sys/messages/down")]
    );
    assert_eq!(rig.stats.status(), SessionStatus::Connected);
    assert_eq!(rig.stats.snapshot().connects, 1);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_deferred_while_link_down() {
    let rig = Rig::start(MockBroker::new(), false);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.broker.connect_attempts(), 0);
    assert_eq!(rig.stats.status(), SessionStatus::WaitingForLink);

    rig.link.send(true).unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(rig.broker.connect_attempts(), 1);
    assert!(rig.broker.is_connected());

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_reports_once_per_second_with_increasing_time() {
    let rig = Rig::start(MockBroker::new(), true);

    sleep(Duration::from_millis(3500)).await;
    assert_eq!(rig.report_times(), vec![1, 2, 3]);

    let last: Value = rig.broker.get_last_json_message(&rig.topics.report).unwrap().unwrap();
    assert_eq!(last["services"][0]["service_id"], "Property");
    assert_eq!(last["services"][0]["properties"]["Temperature"], -127.0);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_reports_while_disconnected() {
    let broker = MockBroker::new();
    broker.refuse_next_connects(u32::MAX);
    let rig = Rig::start(broker, true);

    sleep(Duration::from_secs(5)).await;
    assert!(rig.report_times().is_empty());
    assert_eq!(rig.store.snapshot().report_sequence, 0);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_publish_is_dropped_not_retried() {
    let rig = Rig::start(MockBroker::new(), true);
    sleep(Duration::from_millis(50)).await;

    rig.broker.fail_publishes(true);
    sleep(Duration::from_millis(2500)).await;
    rig.broker.fail_publishes(false);
    sleep(Duration::from_secs(1)).await;

    // reports 1 and 2 were lost; the next one carries the next sequence
    assert_eq!(rig.report_times(), vec![3]);
    assert_eq!(rig.stats.snapshot().publishes_failed, 2);
    assert_eq!(rig.stats.status(), SessionStatus::Connected);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_hands_the_session_back() {
    let rig = Rig::start(MockBroker::new(), true);
    sleep(Duration::from_millis(50)).await;

    let broker = rig.stop().await;
    assert_eq!(broker.connect_attempts(), 1);
}
