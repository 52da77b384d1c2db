//! Actuator range classes and value shaping.
//!
//! Every value written to the serial link is clamped into the range of its
//! actuator's class. Out-of-range values are never rejected.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::{ActuatorCommand, ActuatorId};

/// Hobby servo travel in degrees.
pub const SERVO_MIN: i32 = 0;
pub const SERVO_MAX: i32 = 180;
/// Full-scale signed PWM speed for the motor driver.
pub const MOTOR_LIMIT: i32 = 255;

/// Range convention of an actuator.
///
/// Serialized as JSON with tag `"kind"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActuatorClass {
    /// Generic servo, `[0,180]`.
    #[default]
    Servo,
    /// Servo limited to a mechanical sub-band, e.g. a gripper at `[65,125]`.
    Band { min: i32, max: i32 },
    /// Bidirectional motor speed `[-255,255]`. Magnitudes inside the dead zone
    /// (a percentage of full scale) are sent as 0.
    Motor {
        #[serde(default)]
        dead_zone_pct: u8,
    },
}

impl ActuatorClass {
    /// Inclusive `(min, max)` for this class. A band given upside down is
    /// read with its ends swapped.
    pub fn bounds(&self) -> (i32, i32) {
        match *self {
            ActuatorClass::Servo => (SERVO_MIN, SERVO_MAX),
            ActuatorClass::Band { min, max } => (min.min(max), min.max(max)),
            ActuatorClass::Motor { .. } => (-MOTOR_LIMIT, MOTOR_LIMIT),
        }
    }

    pub fn is_motor(&self) -> bool {
        matches!(self, ActuatorClass::Motor { .. })
    }

    /// Dead-zone threshold in speed units, rounded half up.
    pub fn dead_zone(&self) -> i32 {
        match *self {
            ActuatorClass::Motor { dead_zone_pct } => {
                (MOTOR_LIMIT * i32::from(dead_zone_pct.min(100)) + 50) / 100
            }
            _ => 0,
        }
    }

    /// Clamp into range, then apply the dead zone. Idempotent.
    pub fn shape(
        &self,
        value: i32,
    ) -> i32 {
        let (lo, hi) = self.bounds();
        let value = value.clamp(lo, hi);
        if value.abs() <= self.dead_zone() {
            0
        } else {
            value
        }
    }

    /// Mirror `value` inside the range (`lo + hi - v`). For motors this is a
    /// plain direction flip.
    pub fn mirror(
        &self,
        value: i32,
    ) -> i32 {
        let (lo, hi) = self.bounds();
        let mirrored = i64::from(lo) + i64::from(hi) - i64::from(value);
        mirrored.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }
}

/// Configured actuator on the shared link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorProfile {
    pub id: ActuatorId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub class: ActuatorClass,
    /// Flip direction before shaping. Only applied to operator targets, so a
    /// value is never inverted twice on its way to the wire.
    #[serde(default)]
    pub invert: bool,
}

impl ActuatorProfile {
    pub fn new(
        id: u8,
        class: ActuatorClass,
    ) -> Self {
        ActuatorProfile {
            id: ActuatorId(id),
            name: None,
            class,
            invert: false,
        }
    }

    pub fn named(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }
}

/// Lookup of actuator profiles by id, with a fallback class for ids that were
/// not configured.
#[derive(Debug, Clone, Default)]
pub struct ActuatorTable {
    profiles: Vec<ActuatorProfile>,
    index: HashMap<ActuatorId, usize>,
    fallback: ActuatorClass,
}

impl ActuatorTable {
    pub fn new(
        profiles: impl IntoIterator<Item = ActuatorProfile>,
        fallback: ActuatorClass,
    ) -> Self {
        let profiles: Vec<_> = profiles.into_iter().collect();
        let index = profiles
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id, i))
            .collect();
        ActuatorTable {
            profiles,
            index,
            fallback,
        }
    }

    pub fn profile(
        &self,
        id: ActuatorId,
    ) -> Option<&ActuatorProfile> {
        self.index.get(&id).map(|&i| &self.profiles[i])
    }

    pub fn class_of(
        &self,
        id: ActuatorId,
    ) -> ActuatorClass {
        self.profile(id).map_or(self.fallback, |p| p.class)
    }

    /// Configured profiles in declaration order.
    pub fn profiles(&self) -> impl Iterator<Item = &ActuatorProfile> {
        self.profiles.iter()
    }

    pub fn motors(&self) -> impl Iterator<Item = ActuatorId> + '_ {
        self.profiles
            .iter()
            .filter(|p| p.class.is_motor())
            .map(|p| p.id)
    }

    /// Clamp a command into its actuator's range. Used right before the wire.
    pub fn shape(
        &self,
        cmd: ActuatorCommand,
    ) -> ActuatorCommand {
        ActuatorCommand {
            id: cmd.id,
            angle: self.class_of(cmd.id).shape(cmd.angle),
        }
    }

    /// Turn an operator target into a wire value: invert if configured, then
    /// shape.
    pub fn target(
        &self,
        id: ActuatorId,
        value: i32,
    ) -> ActuatorCommand {
        let class = self.class_of(id);
        let value = match self.profile(id) {
            Some(p) if p.invert => class.mirror(value),
            _ => value,
        };
        ActuatorCommand {
            id,
            angle: class.shape(value),
        }
    }
}
