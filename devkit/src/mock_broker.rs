/*!
In-memory broker session for testing without a broker

Implements [`BrokerSession`], records every publish and subscription and lets
a test inject inbound messages, refuse connects or drop the connection.
Clones share the same state, so a test keeps one handle while the session
worker owns another.
*/

use async_trait::async_trait;
use deskclock_link::error::SessionError;
use deskclock_link::session::{BrokerSession, InboundMessage};
use parking_lot::Mutex;
use rumqttc::QoS;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

impl MockMessage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    connected: bool,
    connect_attempts: u32,
    refuse_connects: u32,
    refuse_subscribes: u32,
    fail_publishes: bool,
    published: Vec<MockMessage>,
    subscriptions: Vec<String>,
    inbox: VecDeque<InboundMessage>,
}

#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a message delivered on the next service round
    pub fn simulate_incoming<S, V>(&self, topic: S, payload: V)
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = InboundMessage::new(topic, payload);
        log::info!("[MOCK] Simulated incoming: {}", message.topic);
        self.state.lock().inbox.push_back(message);
    }

    /// The next `count` connect attempts are refused
    pub fn refuse_next_connects(&self, count: u32) {
        self.state.lock().refuse_connects = count;
    }

    /// The next `count` subscribe requests are rejected
    pub fn refuse_next_subscribes(&self, count: u32) {
        self.state.lock().refuse_subscribes = count;
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state.lock().fail_publishes = fail;
    }

    /// Simulates the broker closing the connection
    pub fn drop_connection(&self) {
        log::info!("[MOCK] Connection dropped");
        self.state.lock().connected = false;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.state.lock().published.clone()
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.state.lock().subscriptions.clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Every published message on `topic`, parsed as JSON
    pub fn json_messages(&self, topic: &str) -> anyhow::Result<Vec<Value>> {
        self.find_messages_by_topic(topic)
            .iter()
            .map(|msg| Ok(serde_json::from_slice(&msg.payload)?))
            .collect()
    }

    pub fn get_last_json_message<T>(&self, topic: &str) -> anyhow::Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.find_messages_by_topic(topic).last() {
            Some(last_msg) => Ok(Some(serde_json::from_slice(&last_msg.payload)?)),
            None => Ok(None),
        }
    }

    /// Forgets recorded publishes and subscriptions
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.published.clear();
        state.subscriptions.clear();
    }
}

#[async_trait]
impl BrokerSession for MockBroker {
    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn connect(&mut self) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            log::info!("[MOCK] Connect attempt {} refused", state.connect_attempts);
            return Err(SessionError::Refused("not authorized".to_string()));
        }
        state.connected = true;
        log::info!("[MOCK] Connect attempt {} accepted", state.connect_attempts);
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(SessionError::NotConnected);
        }
        if state.refuse_subscribes > 0 {
            state.refuse_subscribes -= 1;
            log::info!("[MOCK] Subscription to {} rejected", filter);
            return Err(SessionError::Refused("subscription rejected".to_string()));
        }
        state.subscriptions.push(filter.to_string());
        log::info!("[MOCK] Subscribed to {}", filter);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.drop_connection();
    }

    async fn service_once(&mut self) -> Result<Vec<InboundMessage>, SessionError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(SessionError::NotConnected);
        }
        Ok(state.inbox.drain(..).collect())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if !state.connected || state.fail_publishes {
            return Err(SessionError::NotConnected);
        }
        state.published.push(MockMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos: QoS::AtMostOnce,
        });
        log::info!("[MOCK] Published to {}: {} bytes", topic, payload.len());
        Ok(())
    }
}
