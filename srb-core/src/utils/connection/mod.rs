//! Network side of the bridge.
//!
//! - `server`: the relay's TCP listener and per-connection batch handling
//! - `client`: the panel-side send discipline (state gate, batching, de-dup)
//! - `debounce`: per-actuator settle timers used by the client

/// Relay listener: reads a burst of lines per connection and forwards them to
/// the serial channel.
pub mod server;

pub mod client;
pub mod debounce;
