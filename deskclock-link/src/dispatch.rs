//! Command dispatcher
//!
//! Routes one inbound broker message:
//! - command topic, valid JSON: decode, hand the request to its actuator, acknowledge
//! - command topic, bad JSON: dropped without acknowledgement
//! - downstream topic: logged only
//! - our own acknowledgements echoed back: ignored
//!
//! The acknowledgement is sent for every well-formed command, including unknown
//! ones and ones an actuator refused.

use crate::actuators::ActuatorHub;
use crate::command::{ActuatorRequest, InboundCommand, Topics, SUCCESS_BODY};
use tracing::{debug, info, warn};

/// What a single dispatch did
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// An acknowledgement must be published to `topic`
    Acknowledged {
        topic: String,
        body: &'static str,
        request: Option<ActuatorRequest>,
    },
    /// Downstream message, logged
    Downstream,
    /// Command payload was not a JSON object
    Rejected,
    /// Topic we do not handle
    Ignored,
}

impl DispatchOutcome {
    /// Acknowledgement to publish, if any
    pub fn ack(&self) -> Option<(&str, &'static str)> {
        match self {
            DispatchOutcome::Acknowledged { topic, body, .. } => Some((topic.as_str(), *body)),
            _ => None,
        }
    }
}

pub struct CommandDispatcher {
    topics: Topics,
    actuators: ActuatorHub,
}

impl CommandDispatcher {
    pub fn new(topics: Topics, actuators: ActuatorHub) -> Self {
        Self { topics, actuators }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn dispatch(&mut self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        if self.topics.is_response(topic) {
            debug!("Ignoring echoed acknowledgement on {}", topic);
            return DispatchOutcome::Ignored;
        }

        if self.topics.is_downstream(topic) {
            info!(
                "Downstream message ({} bytes): {}",
                payload.len(),
                String::from_utf8_lossy(payload)
            );
            return DispatchOutcome::Downstream;
        }

        if !self.topics.is_command(topic) {
            debug!("Ignoring message on unrelated topic {}", topic);
            return DispatchOutcome::Ignored;
        }

        let command = match InboundCommand::parse(topic, payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("Malformed command on {}: {}", topic, e);
                return DispatchOutcome::Rejected;
            }
        };

        let request = match command.decode() {
            Ok(request) => {
                debug!("Command {:?} -> {:?}", command.command_name, request);
                if let Err(e) = self.actuators.apply(request) {
                    warn!("Actuator refused {:?}: {}", request, e);
                }
                Some(request)
            }
            Err(e) => {
                warn!("Command not executed: {}", e);
                None
            }
        };

        DispatchOutcome::Acknowledged {
            topic: self.topics.response_topic(command.correlation_id.as_deref()),
            body: SUCCESS_BODY,
            request,
        }
    }
}
