/*!
Test harness running a whole device against the mocks

- [`MockBroker`] in place of the broker connection
- [`LinkSwitch`] in place of the network interface
- an in-memory pipe in place of the serial line
- assertions on the JSON published by the device
*/

use crate::mock_broker::MockBroker;
use crate::payloads::CommandBuilder;
use anyhow::Result;
use deskclock_link::config::DeviceConfig;
use deskclock_link::device::{Device, RunningDevice};
use deskclock_link::link::{Association, LinkDriver};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::time::Instant;

const POLL_STEP: Duration = Duration::from_millis(10);

/// Network link a test turns on and off
#[derive(Clone)]
pub struct LinkSwitch {
    up: Arc<AtomicBool>,
}

impl LinkSwitch {
    pub fn new(up: bool) -> Self {
        Self {
            up: Arc::new(AtomicBool::new(up)),
        }
    }

    pub fn set(&self, up: bool) {
        log::info!("[MOCK] Link {}", if up { "up" } else { "down" });
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

impl LinkDriver for LinkSwitch {
    fn begin(&mut self) {}

    fn association(&mut self) -> Association {
        if self.is_up() {
            Association::Established
        } else {
            Association::Pending
        }
    }

    fn abort(&mut self) {}
}

pub struct DeviceHarness {
    pub broker: MockBroker,
    pub link: LinkSwitch,
    pub commands: CommandBuilder,
    pub device: RunningDevice,
    telegrams: DuplexStream,
}

impl DeviceHarness {
    /// Starts every device worker with the link already up
    pub fn start(config: DeviceConfig) -> Result<Self> {
        env_logger::try_init().ok();

        let commands = CommandBuilder::new(&config.device.topic_root);
        let device = Device::new(config)?;
        let broker = MockBroker::new();
        let link = LinkSwitch::new(true);
        let (telegrams, reader) = tokio::io::duplex(256);
        let running = device.start(broker.clone(), link.clone(), Some(Box::new(reader)));

        Ok(Self {
            broker,
            link,
            commands,
            device: running,
            telegrams,
        })
    }

    pub fn report_topic(&self) -> &str {
        &self.commands.topics().report
    }

    /// Delivers a command and returns the topic its acknowledgement goes to
    pub fn send_command(&self, request_id: &str, body: &Value) -> Result<String> {
        let payload = serde_json::to_vec(body)?;
        self.broker
            .simulate_incoming(self.commands.command_topic(request_id), payload);
        Ok(self.commands.response_topic(request_id))
    }

    /// Writes raw bytes on the serial pipe
    pub async fn send_telegram(&mut self, telegram: &str) -> Result<()> {
        self.telegrams.write_all(telegram.as_bytes()).await?;
        Ok(())
    }

    /// Waits until `topic` has at least one message and returns the last
    pub async fn wait_for_message(&self, topic: &str, timeout: Duration) -> Result<Option<Value>> {
        self.wait_until(topic, timeout, |_| true).await
    }

    /// Waits until the last message on `topic` satisfies `accept`
    pub async fn wait_until<F>(&self, topic: &str, timeout: Duration, accept: F) -> Result<Option<Value>>
    where
        F: Fn(&Value) -> bool,
    {
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            if let Some(msg) = self.broker.get_last_json_message::<Value>(topic)? {
                if accept(&msg) {
                    return Ok(Some(msg));
                }
            }
            tokio::time::sleep(POLL_STEP).await;
        }

        log::warn!("Timeout waiting for message on {}", topic);
        Ok(None)
    }

    pub fn assert_field_equals(&self, topic: &str, field_path: &str, expected: &Value) -> Result<()> {
        let Some(msg) = self.broker.get_last_json_message::<Value>(topic)? else {
            anyhow::bail!("No message published on {}", topic);
        };
        match nested_field(&msg, field_path) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => anyhow::bail!(
                "Field '{}' mismatch: expected {:?}, got {:?}",
                field_path,
                expected,
                actual
            ),
            None => anyhow::bail!("Field '{}' not found in {}", field_path, topic),
        }
    }

    pub async fn stop(self) {
        self.device.stop().await;
    }
}

/// Dotted path lookup; numeric parts index arrays (`services.0.service_id`)
pub fn nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for part in path.split('.') {
        current = match current {
            Value::Object(obj) => obj.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}
