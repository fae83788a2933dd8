//! MQTT broker session over rumqttc
//!
//! A fresh client and event loop are built on every connect, so a dropped
//! connection never leaves stale requests queued for the next one.

use super::{BrokerSession, InboundMessage};
use crate::config::{BrokerConfig, SessionConfig};
use crate::error::SessionError;
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Request channel capacity between the client and its event loop
const REQUEST_CAPACITY: usize = 10;

pub struct RumqttSession {
    options: MqttOptions,
    connect_timeout: Duration,
    service_window: Duration,
    connection: Option<(AsyncClient, EventLoop)>,
}

impl RumqttSession {
    pub fn new(options: MqttOptions, connect_timeout: Duration, service_window: Duration) -> Self {
        Self {
            options,
            connect_timeout,
            service_window,
            connection: None,
        }
    }

    pub fn from_config(broker: &BrokerConfig, session: &SessionConfig) -> Self {
        let mut options = MqttOptions::new(&broker.client_id, &broker.host, broker.port);
        options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        if let Some(username) = &broker.username {
            options.set_credentials(username, broker.password.clone().unwrap_or_default());
        }

        Self::new(
            options,
            Duration::from_secs(broker.connect_timeout_secs),
            session.service_window(),
        )
    }

    fn drop_connection(&mut self) {
        if self.connection.take().is_some() {
            debug!("Broker connection dropped");
        }
    }
}

/// Human-readable reason for a refused connect
pub fn describe_refusal(code: ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Success => "accepted",
        ConnectReturnCode::RefusedProtocolVersion => "unsupported protocol version",
        ConnectReturnCode::BadClientId => "client id rejected",
        ConnectReturnCode::ServiceUnavailable => "broker unavailable",
        ConnectReturnCode::BadUserNamePassword => "bad username or password",
        ConnectReturnCode::NotAuthorized => "not authorized",
        #[allow(unreachable_patterns)]
        _ => "refused",
    }
}

async fn await_connack(eventloop: &mut EventLoop) -> Result<(), SessionError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(SessionError::Refused(describe_refusal(code).to_string())),
                };
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(SessionError::Refused(describe_refusal(code).to_string()));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[async_trait]
impl BrokerSession for RumqttSession {
    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    async fn connect(&mut self) -> Result<(), SessionError> {
        self.drop_connection();
        info!(
            "Connecting to broker {:?} as {}",
            self.options.broker_address(),
            self.options.client_id()
        );

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        match tokio::time::timeout(self.connect_timeout, await_connack(&mut eventloop)).await {
            Ok(Ok(())) => {
                self.connection = Some((client, eventloop));
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::Timeout(self.connect_timeout)),
        }
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), SessionError> {
        let (client, _) = self.connection.as_ref().ok_or(SessionError::NotConnected)?;
        client.try_subscribe(filter, QoS::AtMostOnce)?;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.drop_connection();
    }

    async fn service_once(&mut self) -> Result<Vec<InboundMessage>, SessionError> {
        let deadline = Instant::now() + self.service_window;
        let mut inbound = Vec::new();

        loop {
            let Some((_, eventloop)) = self.connection.as_mut() else {
                return Err(SessionError::NotConnected);
            };
            let polled = tokio::time::timeout_at(deadline, eventloop.poll()).await;
            match polled {
                Err(_) => break,
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    debug!("Received {} bytes on {}", publish.payload.len(), publish.topic);
                    inbound.push(InboundMessage::new(publish.topic, publish.payload.to_vec()));
                }
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    warn!("Broker closed the session");
                    self.drop_connection();
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    self.drop_connection();
                    if inbound.is_empty() {
                        return Err(e.into());
                    }
                    warn!("Broker connection error after {} message(s): {}", inbound.len(), e);
                    break;
                }
            }
        }
        Ok(inbound)
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        let (client, _) = self.connection.as_ref().ok_or(SessionError::NotConnected)?;
        client.try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusal_reasons() {
        assert_eq!(
            describe_refusal(ConnectReturnCode::BadUserNamePassword),
            "bad username or password"
        );
        assert_eq!(describe_refusal(ConnectReturnCode::NotAuthorized), "not authorized");
    }

    #[tokio::test]
    async fn test_requests_need_a_connection() {
        let mut session = RumqttSession::from_config(&BrokerConfig::default(), &SessionConfig::default());
        assert!(!session.is_connected());
        assert!(matches!(
            session.publish("t", b"x").await,
            Err(SessionError::NotConnected)
        ));
        assert!(matches!(
            session.subscribe("t/#").await,
            Err(SessionError::NotConnected)
        ));
        assert!(matches!(session.service_once().await, Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_within_timeout() {
        let broker = BrokerConfig {
            host: "127.0.0.1".to_string(),
            // reserved port, nothing listens there
            port: 1,
            connect_timeout_secs: 2,
            ..BrokerConfig::default()
        };
        let mut session = RumqttSession::from_config(&broker, &SessionConfig::default());
        assert!(session.connect().await.is_err());
        assert!(!session.is_connected());
    }
}
