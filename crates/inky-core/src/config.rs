//! Runtime configuration consumed by the agent.
//!
//! These are the resolved types the control plane runs on. Loading and
//! layering (YAML file + environment) live in `inky-config`; nothing
//! here touches the filesystem.

use inky_api::bus::BusConfig;
use inky_api::messages::Orientation;
use inky_api::storage::StoreCredentials;

use crate::error::CoreError;

/// Immutable device identity, set at startup.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub id: String,
    pub room: Option<String>,
}

/// Display behavior settings.
#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub orientation: Orientation,
    /// Color saturation for Spectra 6 panels, 0.0–1.0.
    pub saturation: f32,
    /// Use the in-memory mock panel instead of hardware.
    pub mock: bool,
    pub mock_width: u32,
    pub mock_height: u32,
    /// Vendor driver command for the hardware panel.
    pub driver: Option<String>,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            orientation: Orientation::Landscape,
            saturation: 0.5,
            mock: false,
            mock_width: 1600,
            mock_height: 1200,
            driver: None,
        }
    }
}

/// Everything the agent needs to run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub device: DeviceIdentity,
    pub display: DisplaySettings,
    pub bus: BusConfig,
    /// Pre-seeded store credentials, when configured ahead of
    /// registration. The registration response overwrites these.
    pub store_defaults: Option<StoreCredentials>,
}

impl AgentConfig {
    /// Reject configurations the agent cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.device.id.trim().is_empty() {
            return Err(CoreError::Config {
                message: "device id must not be empty".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.display.saturation) {
            return Err(CoreError::Config {
                message: format!(
                    "display saturation {} out of range 0.0-1.0",
                    self.display.saturation
                ),
            });
        }
        if !self.display.mock && self.display.driver.is_none() {
            return Err(CoreError::Config {
                message: "display driver command required unless mock mode is enabled".into(),
            });
        }
        Ok(())
    }
}
