//! Wire-level types shared by the relay and the control panels.
//!
//! - `codec`: the newline-delimited `<id> <angle>` text protocol
//! - `actuator`: per-actuator range classes and value shaping

pub mod actuator;
pub mod codec;

use core::fmt;

use serde::{Deserialize, Serialize};

pub use actuator::{ActuatorClass, ActuatorProfile, ActuatorTable};
pub use codec::{decode, decode_lines, encode, encode_line, DecodedBatch};

/// Identifies one actuator on the shared serial link (base, elbow, gripper...).
///
/// Assigned by convention between panel and microcontroller firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActuatorId(pub u8);

impl fmt::Display for ActuatorId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for ActuatorId {
    fn from(id: u8) -> Self {
        ActuatorId(id)
    }
}

/// A target angle (servo) or signed speed (motor) for one actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActuatorCommand {
    pub id: ActuatorId,
    pub angle: i32,
}

impl ActuatorCommand {
    pub fn new(
        id: u8,
        angle: i32,
    ) -> Self {
        ActuatorCommand {
            id: ActuatorId(id),
            angle,
        }
    }
}

/// Ordered commands carried by one TCP payload. Order is kept end to end and
/// duplicates are forwarded as-is.
pub type CommandBatch = Vec<ActuatorCommand>;

/// Which line grammar a deployment speaks.
///
/// Serialized as JSON with tag `"protocol"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum ProtocolMode {
    /// Every line is `<id> <angle>`.
    #[default]
    Multi,
    /// Single-actuator panels (LED brightness, single servo, motor) send a bare
    /// `<angle>` that addresses `default_id`.
    Legacy { default_id: ActuatorId },
}
