//! Configuration loading for the inkyd display agent.
//!
//! Layering, lowest precedence first: built-in defaults → optional
//! YAML file → `INKY_`-prefixed environment variables (nested with
//! `__`, e.g. `INKY_MQTT__HOST`). The file structs here mirror the
//! on-disk YAML; [`Settings::into_agent_config`] translates them into
//! the runtime types `inky-core` consumes.

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use inky_api::bus::{BusConfig, BusTransport};
use inky_api::messages::Orientation;
use inky_api::storage::StoreCredentials;
use inky_core::{AgentConfig, DeviceIdentity, DisplaySettings};

const ENV_PREFIX: &str = "INKY_";
const ENV_NESTING: &str = "__";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── YAML config structs ─────────────────────────────────────────────

/// Top-level settings, section per subsystem.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub device: DeviceSection,

    #[serde(default)]
    pub mqtt: MqttSection,

    #[serde(default)]
    pub minio: MinioSection,

    #[serde(default)]
    pub display: DisplaySection,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DeviceSection {
    #[serde(default = "default_device_id")]
    pub id: String,

    #[serde(default)]
    pub room: Option<String>,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            id: default_device_id(),
            room: None,
        }
    }
}

fn default_device_id() -> String {
    "inky-display".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MqttSection {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    /// Plaintext in the file; wrapped in `SecretString` on conversion.
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    /// "tcp" or "websockets".
    #[serde(default = "default_transport")]
    pub transport: String,

    #[serde(default)]
    pub websocket_path: Option<String>,

    #[serde(default)]
    pub tls: bool,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            client_id: None,
            transport: default_transport(),
            websocket_path: None,
            tls: false,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".into()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_transport() -> String {
    "tcp".into()
}

/// Object-store defaults. Normally the registration response supplies
/// credentials; pre-seeding both keys here configures the store at
/// startup.
#[derive(Debug, Deserialize, Serialize)]
pub struct MinioSection {
    #[serde(default = "default_minio_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_minio_bucket")]
    pub bucket: String,

    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<String>,

    #[serde(default)]
    pub secure: bool,
}

impl Default for MinioSection {
    fn default() -> Self {
        Self {
            endpoint: default_minio_endpoint(),
            bucket: default_minio_bucket(),
            access_key: None,
            secret_key: None,
            secure: false,
        }
    }
}

fn default_minio_endpoint() -> String {
    "localhost:9000".into()
}
fn default_minio_bucket() -> String {
    "inky-images".into()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DisplaySection {
    #[serde(default)]
    pub orientation: Orientation,

    #[serde(default = "default_saturation")]
    pub saturation: f32,

    #[serde(default)]
    pub mock: bool,

    #[serde(default = "default_mock_width")]
    pub mock_width: u32,

    #[serde(default = "default_mock_height")]
    pub mock_height: u32,

    /// Vendor driver command for real hardware.
    #[serde(default)]
    pub driver: Option<String>,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            orientation: Orientation::default(),
            saturation: default_saturation(),
            mock: false,
            mock_width: default_mock_width(),
            mock_height: default_mock_height(),
            driver: None,
        }
    }
}

fn default_saturation() -> f32 {
    0.5
}
fn default_mock_width() -> u32 {
    1600
}
fn default_mock_height() -> u32 {
    1200
}

// ── Loading & translation ───────────────────────────────────────────

impl Settings {
    /// Load settings: defaults, then the YAML file (skipped when the
    /// path is absent), then environment variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }
        let settings = figment
            .merge(Env::prefixed(ENV_PREFIX).split(ENV_NESTING))
            .extract()?;
        Ok(settings)
    }

    /// Translate into the runtime configuration the agent consumes.
    pub fn into_agent_config(self) -> Result<AgentConfig, ConfigError> {
        let transport = match self.mqtt.transport.as_str() {
            "tcp" => BusTransport::Tcp,
            "websockets" => BusTransport::Websockets,
            other => {
                return Err(ConfigError::Validation {
                    field: "mqtt.transport".into(),
                    reason: format!("expected \"tcp\" or \"websockets\", got {other:?}"),
                });
            }
        };

        let store_defaults = match (self.minio.access_key, self.minio.secret_key) {
            (Some(access_key), Some(secret_key)) => Some(StoreCredentials {
                endpoint: self.minio.endpoint,
                bucket: self.minio.bucket,
                access_key,
                secret_key: SecretString::from(secret_key),
                secure: self.minio.secure,
            }),
            _ => None,
        };

        Ok(AgentConfig {
            device: DeviceIdentity {
                id: self.device.id,
                room: self.device.room,
            },
            display: DisplaySettings {
                orientation: self.display.orientation,
                saturation: self.display.saturation,
                mock: self.display.mock,
                mock_width: self.display.mock_width,
                mock_height: self.display.mock_height,
                driver: self.display.driver,
            },
            bus: BusConfig {
                host: self.mqtt.host,
                port: self.mqtt.port,
                username: self.mqtt.username,
                password: self.mqtt.password.map(SecretString::from),
                client_id: self.mqtt.client_id,
                transport,
                websocket_path: self.mqtt.websocket_path,
                tls: self.mqtt.tls,
            },
            store_defaults,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_without_file_or_env() {
        figment::Jail::expect_with(|_jail| {
            let settings = Settings::load(None).unwrap();
            assert_eq!(settings.device.id, "inky-display");
            assert_eq!(settings.mqtt.host, "localhost");
            assert_eq!(settings.mqtt.port, 1883);
            assert_eq!(settings.minio.bucket, "inky-images");
            assert!(!settings.display.mock);
            Ok(())
        });
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "inky.yaml",
                r"
device:
  id: inky-kitchen
  room: Kitchen
mqtt:
  host: broker.local
  port: 8883
  tls: true
display:
  mock: true
  saturation: 0.7
",
            )?;

            let settings = Settings::load(Some(Path::new("inky.yaml"))).unwrap();
            assert_eq!(settings.device.id, "inky-kitchen");
            assert_eq!(settings.device.room.as_deref(), Some("Kitchen"));
            assert_eq!(settings.mqtt.host, "broker.local");
            assert_eq!(settings.mqtt.port, 8883);
            assert!(settings.mqtt.tls);
            assert!(settings.display.mock);
            assert!((settings.display.saturation - 0.7).abs() < f32::EPSILON);
            // Untouched sections keep their defaults.
            assert_eq!(settings.minio.endpoint, "localhost:9000");
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("inky.yaml", "device:\n  id: from-file\n")?;
            jail.set_env("INKY_DEVICE__ID", "from-env");
            jail.set_env("INKY_MQTT__PORT", "9001");

            let settings = Settings::load(Some(Path::new("inky.yaml"))).unwrap();
            assert_eq!(settings.device.id, "from-env");
            assert_eq!(settings.mqtt.port, 9001);
            Ok(())
        });
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        figment::Jail::expect_with(|_jail| {
            let settings = Settings::load(Some(Path::new("does-not-exist.yaml"))).unwrap();
            assert_eq!(settings.device.id, "inky-display");
            Ok(())
        });
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let mut settings = Settings::default();
        settings.mqtt.transport = "carrier-pigeon".into();

        let err = settings.into_agent_config().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn store_defaults_require_both_keys() {
        let mut settings = Settings::default();
        settings.minio.access_key = Some("ak".into());
        let config = settings.into_agent_config().unwrap();
        assert!(config.store_defaults.is_none());

        let mut settings = Settings::default();
        settings.minio.access_key = Some("ak".into());
        settings.minio.secret_key = Some("sk".into());
        let config = settings.into_agent_config().unwrap();
        let defaults = config.store_defaults.unwrap();
        assert_eq!(defaults.endpoint, "localhost:9000");
        assert_eq!(defaults.bucket, "inky-images");
    }

    #[test]
    fn websocket_transport_translates() {
        let mut settings = Settings::default();
        settings.mqtt.transport = "websockets".into();
        settings.mqtt.websocket_path = Some("/mqtt".into());

        let config = settings.into_agent_config().unwrap();
        assert_eq!(config.bus.transport, BusTransport::Websockets);
        assert_eq!(config.bus.websocket_path.as_deref(), Some("/mqtt"));
    }
}
