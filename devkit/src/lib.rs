/*!
# Deskclock DevKit - mocks and helpers for testing the link without hardware

- In-memory broker session recording every publish and subscription
- Switchable network link
- Recording actuators
- Command and telegram payload builders
- Harness running a whole device against the mocks
*/

pub mod actuators;
pub mod harness;
pub mod mock_broker;
pub mod payloads;

pub use actuators::RecordingActuators;
pub use harness::{nested_field, DeviceHarness, LinkSwitch};
pub use mock_broker::{MockBroker, MockMessage};
pub use payloads::CommandBuilder;
