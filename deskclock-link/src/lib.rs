//! Deskclock Link - connectivity and telemetry layer of the desk clock
//!
//! - Serial telegram framing into host telemetry samples
//! - Aggregate telemetry store shared by every producer
//! - Network link and broker session state machines
//! - Command dispatch to LEDs, alarms and audio
//! - Periodic telemetry reports

pub mod actuators;
pub mod command;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod link;
pub mod publisher;
pub mod sensors;
pub mod session;
pub mod state;
pub mod telemetry;

pub use command::{ActuatorRequest, InboundCommand, PlaybackMode, Topics};
pub use config::DeviceConfig;
pub use device::{Device, RunningDevice};
pub use dispatch::{CommandDispatcher, DispatchOutcome};
pub use error::{ActuatorError, CommandError, ConfigError, SessionError};
pub use frame::FrameParser;
pub use link::{Association, LinkDriver, LinkState, LinkStateMachine};
pub use publisher::TelemetryPublisher;
pub use session::{BrokerSession, InboundMessage, SessionStats, SessionWorker};
pub use telemetry::{AggregateTelemetry, TelemetrySample, TelemetryStore};
