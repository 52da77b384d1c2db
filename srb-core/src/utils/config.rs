//! Configuration for the relay daemon and the control panel client.
//!
//! Both load from an optional JSON file in which every field may be omitted.
//! Command-line flags in the binaries override what the file sets.

use std::{fs, net::SocketAddr, path::Path, time::Duration};

use hashbrown::HashSet;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::utils::{
    controllers::DEFAULT_QUEUE_DEPTH,
    errors::ConfigError,
    protocol::{
        actuator::{SERVO_MAX, SERVO_MIN},
        ActuatorClass, ActuatorProfile, ActuatorTable, ProtocolMode,
    },
};

/// Serial device settings for the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub device: String,
    pub baud: u32,
    /// Log lines instead of opening the device.
    pub dry_run: bool,
    pub queue_depth: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            device: "/dev/ttyACM0".into(),
            baud: 9600,
            dry_run: false,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Settings for the TCP-to-serial relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub backlog: u32,
    /// A batch ends when the peer closes or sends nothing for this long.
    pub idle_timeout_ms: u64,
    pub max_batch_bytes: usize,
    pub serial: SerialConfig,
    pub mode: ProtocolMode,
    /// Class applied to ids missing from `actuators`.
    pub fallback: ActuatorClass,
    pub actuators: Vec<ActuatorProfile>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen: SocketAddr::from(([0, 0, 0, 0], 5001)),
            backlog: 10,
            idle_timeout_ms: 1500,
            max_batch_bytes: 64 * 1024,
            serial: SerialConfig::default(),
            mode: ProtocolMode::Multi,
            fallback: ActuatorClass::Servo,
            actuators: Vec::new(),
        }
    }
}

impl RelayConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn table(&self) -> ActuatorTable {
        ActuatorTable::new(self.actuators.iter().cloned(), self.fallback)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog == 0 {
            return Err(ConfigError::Invalid("backlog must be at least 1".into()));
        }
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid("idle_timeout_ms must be positive".into()));
        }
        if self.max_batch_bytes == 0 {
            return Err(ConfigError::Invalid("max_batch_bytes must be positive".into()));
        }
        if self.serial.baud == 0 {
            return Err(ConfigError::Invalid("serial.baud must be positive".into()));
        }
        validate_class(&self.fallback)?;
        validate_profiles(&self.actuators)
    }
}

/// Settings for a control panel's command client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub bridge: SocketAddr,
    /// Quiet time after the last change before a target is sent.
    pub debounce_ms: u64,
    pub send_timeout_ms: u64,
    /// Timeout for the reachability check made by `connect`.
    pub probe_timeout_ms: u64,
    pub mode: ProtocolMode,
    pub fallback: ActuatorClass,
    pub actuators: Vec<ActuatorProfile>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        PanelConfig {
            bridge: SocketAddr::from(([127, 0, 0, 1], 5001)),
            debounce_ms: 120,
            send_timeout_ms: 700,
            probe_timeout_ms: 1500,
            mode: ProtocolMode::Multi,
            fallback: ActuatorClass::Servo,
            actuators: Vec::new(),
        }
    }
}

impl PanelConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn table(&self) -> ActuatorTable {
        ActuatorTable::new(self.actuators.iter().cloned(), self.fallback)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == 0 {
            return Err(ConfigError::Invalid("debounce_ms must be positive".into()));
        }
        if self.send_timeout_ms == 0 || self.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        validate_class(&self.fallback)?;
        validate_profiles(&self.actuators)
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let shown = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: shown.clone(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: shown,
        source,
    })
}

fn validate_class(class: &ActuatorClass) -> Result<(), ConfigError> {
    match *class {
        ActuatorClass::Band { min, max } if min > max => Err(ConfigError::Invalid(format!(
            "band [{min},{max}] is empty"
        ))),
        ActuatorClass::Band { min, max } if min < SERVO_MIN || max > SERVO_MAX => {
            Err(ConfigError::Invalid(format!(
                "band [{min},{max}] exceeds servo travel [{SERVO_MIN},{SERVO_MAX}]"
            )))
        }
        ActuatorClass::Motor { dead_zone_pct } if dead_zone_pct > 100 => Err(
            ConfigError::Invalid(format!("dead zone {dead_zone_pct}% is over 100%")),
        ),
        _ => Ok(()),
    }
}

fn validate_profiles(profiles: &[ActuatorProfile]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for profile in profiles {
        if !seen.insert(profile.id) {
            return Err(ConfigError::Invalid(format!(
                "actuator id {} is configured twice",
                profile.id
            )));
        }
        validate_class(&profile.class)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::protocol::ActuatorId;

    #[test]
    fn defaults_match_the_servo_deployment() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.listen.port(), 5001);
        assert_eq!(cfg.backlog, 10);
        assert_eq!(cfg.idle_timeout(), Duration::from_millis(1500));
        assert_eq!(cfg.serial.device, "/dev/ttyACM0");
        assert_eq!(cfg.serial.baud, 9600);
        assert!(cfg.validate().is_ok());
        assert!(PanelConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: RelayConfig = serde_json::from_str(
            r#"{
                "listen": "0.0.0.0:5000",
                "serial": { "baud": 115200 },
                "mode": { "protocol": "legacy", "default_id": 1 },
                "actuators": [
                    { "id": 1, "name": "motor", "class": { "kind": "motor", "dead_zone_pct": 5 } }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.listen.port(), 5000);
        assert_eq!(cfg.serial.baud, 115200);
        assert_eq!(cfg.serial.device, "/dev/ttyACM0");
        assert_eq!(
            cfg.mode,
            ProtocolMode::Legacy {
                default_id: ActuatorId(1)
            }
        );
        assert_eq!(
            cfg.table().class_of(ActuatorId(1)),
            ActuatorClass::Motor { dead_zone_pct: 5 }
        );
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn profile_class_defaults_to_servo() {
        let profile: ActuatorProfile = serde_json::from_str(r#"{ "id": 3 }"#).unwrap();
        assert_eq!(profile.class, ActuatorClass::Servo);
        assert!(!profile.invert);
    }

    #[test]
    fn rejects_bad_bands_and_duplicates() {
        let mut cfg = PanelConfig::default();
        cfg.actuators = vec![ActuatorProfile::new(2, ActuatorClass::Band { min: 125, max: 65 })];
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        cfg.actuators = vec![ActuatorProfile::new(2, ActuatorClass::Band { min: 65, max: 200 })];
        assert!(cfg.validate().is_err());

        cfg.actuators = vec![
            ActuatorProfile::new(1, ActuatorClass::Servo),
            ActuatorProfile::new(1, ActuatorClass::Servo),
        ];
        assert!(cfg.validate().is_err());

        cfg.actuators = vec![ActuatorProfile::new(4, ActuatorClass::Motor { dead_zone_pct: 101 })];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let mut relay = RelayConfig::default();
        relay.idle_timeout_ms = 0;
        assert!(relay.validate().is_err());

        let mut panel = PanelConfig::default();
        panel.debounce_ms = 0;
        assert!(panel.validate().is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = RelayConfig::load("/nonexistent/srb-relay.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
