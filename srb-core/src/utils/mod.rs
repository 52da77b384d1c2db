//! Utility re-exports for the serial relay bridge.
//!
//! - `protocol`: wire codec and actuator range profiles
//! - `controllers`: the serial actuator channel and its links
//! - `connection`: TCP bridge server and the panel-side command client
//! - `config`: JSON/CLI configuration for both ends
//! - `errors`: error types shared across the crate

pub mod config;
pub mod connection;
pub mod controllers;
pub mod errors;
pub mod protocol;

pub use config::{PanelConfig, RelayConfig};
pub use connection::client::{CommandClient, PanelEvent, Status};
pub use connection::server::run as relay;
pub use controllers::SerialChannel;
pub use protocol::{ActuatorCommand, ActuatorId, ProtocolMode};
