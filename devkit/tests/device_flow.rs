//! Whole device against the mocks: telegrams in, reports and actuators out

use deskclock_devkit::payloads::telegram;
use deskclock_devkit::{nested_field, CommandBuilder, DeviceHarness};
use deskclock_link::actuators::{AlarmBook, PlaybackRequest};
use deskclock_link::command::{PlaybackMode, SUCCESS_BODY};
use deskclock_link::config::DeviceConfig;
use serde_json::json;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn config(alarm_dir: &tempfile::TempDir) -> DeviceConfig {
    let mut config = DeviceConfig::default();
    config.device.topic_root = "$oc/devices/clock-1".to_string();
    config.actuators.alarm_file = Some(alarm_dir.path().join("alarms.json"));
    config
}

#[tokio::test(start_paused = true)]
async fn test_telegram_reaches_report() {
    let dir = tempfile::tempdir().unwrap();
    let mut harness = DeviceHarness::start(config(&dir)).unwrap();
    assert_eq!(harness.report_topic(), "$oc/devices/clock-1/sys/properties/report");

    harness.send_telegram(&telegram(23, Some((45, 12)), 61.5)).await.unwrap();

    let topic = harness.report_topic().to_string();
    let report = harness
        .wait_until(&topic, WAIT, |report| {
            nested_field(report, "services.0.properties.CPULoad") == Some(&json!(23))
        })
        .await
        .unwrap()
        .expect("report with the host sample");

    assert_eq!(nested_field(&report, "services.0.service_id"), Some(&json!("Property")));
    harness.assert_field_equals(&topic, "services.0.properties.GPUTemp", &json!(45)).unwrap();
    harness.assert_field_equals(&topic, "services.0.properties.GPULoad", &json!(12)).unwrap();
    harness.assert_field_equals(&topic, "services.0.properties.RAMLoad", &json!(61.5)).unwrap();
    harness.assert_field_equals(&topic, "services.0.properties.Temperature", &json!(-127.0)).unwrap();

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_partial_telegram_keeps_previous_values() {
    let dir = tempfile::tempdir().unwrap();
    let mut harness = DeviceHarness::start(config(&dir)).unwrap();
    let topic = harness.report_topic().to_string();

    harness.send_telegram(&telegram(23, Some((45, 12)), 61.5)).await.unwrap();
    harness.send_telegram(&telegram(80, None, 70.0)).await.unwrap();

    harness
        .wait_until(&topic, WAIT, |report| {
            nested_field(report, "services.0.properties.CPULoad") == Some(&json!(80))
        })
        .await
        .unwrap()
        .expect("report with the second sample");
    harness.assert_field_equals(&topic, "services.0.properties.GPUTemp", &json!(45)).unwrap();
    harness.assert_field_equals(&topic, "services.0.properties.RAMLoad", &json!(70.0)).unwrap();

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_alarm_command_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let harness = DeviceHarness::start(config(&dir)).unwrap();

    let ack_topic = harness
        .send_command("alarm-1", &CommandBuilder::alarm(6, 45, "Friday", true))
        .unwrap();
    let ack = harness.wait_for_message(&ack_topic, WAIT).await.unwrap();
    assert!(ack.is_some());
    assert_eq!(
        harness.broker.find_messages_by_topic(&ack_topic)[0].text(),
        SUCCESS_BODY
    );

    {
        let alarms = harness.device.alarms.lock();
        let slot = alarms.get(0).expect("slot 0 written");
        assert_eq!((slot.hour, slot.minute), (6, 45));
        assert_eq!(slot.days_of_week, 1 << 5);
        assert!(slot.enabled);
    }
    harness.stop().await;

    let reopened = AlarmBook::open(dir.path().join("alarms.json")).unwrap();
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.get(0).map(|a| a.minute), Some(45));
}

#[tokio::test(start_paused = true)]
async fn test_play_song_reaches_the_ui() {
    let dir = tempfile::tempdir().unwrap();
    let mut harness = DeviceHarness::start(config(&dir)).unwrap();

    let ack_topic = harness
        .send_command("song", &CommandBuilder::play_song(3, "Lite"))
        .unwrap();
    let request = tokio::time::timeout(WAIT, harness.device.playback.recv())
        .await
        .unwrap();
    assert_eq!(
        request,
        Some(PlaybackRequest {
            index: 3,
            mode: PlaybackMode::Lite
        })
    );
    assert!(harness.wait_for_message(&ack_topic, WAIT).await.unwrap().is_some());

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_session_reconnects_after_link_returns() {
    let dir = tempfile::tempdir().unwrap();
    let harness = DeviceHarness::start(config(&dir)).unwrap();

    let topic = harness.report_topic().to_string();
    assert!(harness.wait_for_message(&topic, WAIT).await.unwrap().is_some());

    harness.link.set(false);
    tokio::time::sleep(Duration::from_millis(500)).await;
    harness.broker.drop_connection();
    tokio::time::sleep(Duration::from_secs(5)).await;
    let attempts_while_down = harness.broker.connect_attempts();

    harness.link.set(true);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.broker.connect_attempts(), attempts_while_down + 1);
    assert_eq!(harness.device.stats.snapshot().reconnects, 1);

    harness.stop().await;
}
