//! Wire message types exchanged over the bus.
//!
//! JSON payloads, field names fixed by the coordinator's schema. All
//! types are plain data: construction and routing live in
//! [`bus`](crate::bus) and `inky-core`.

use serde::{Deserialize, Serialize};

// ── Display hardware description ─────────────────────────────────────

/// Physical panel orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Landscape,
    Portrait,
}

impl Orientation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Landscape => "landscape",
            Self::Portrait => "portrait",
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display hardware characteristics sent during device registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default)]
    pub orientation: Orientation,

    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for DisplayInfo {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            orientation: Orientation::default(),
            model: default_model(),
        }
    }
}

fn default_width() -> u32 {
    1600
}
fn default_height() -> u32 {
    1200
}
fn default_model() -> String {
    "inky_impression_13_spectra6".into()
}

// ── Registration handshake ───────────────────────────────────────────

/// Registration payload published on startup to `inky/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub device_id: String,

    #[serde(default)]
    pub display: DisplayInfo,

    #[serde(default)]
    pub room: Option<String>,
}

/// Registration outcome reported by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Registered,
    Updated,
}

/// Response received on `inky/{device_id}/registered`.
///
/// Carries read-only object-store credentials for image fetches.
/// Duplicates are applied idempotently (credentials overwritten).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub status: RegistrationStatus,
    pub minio_endpoint: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    #[serde(default)]
    pub minio_secure: bool,
}

// ── Commands ─────────────────────────────────────────────────────────

/// Command action, preserving the raw string for anything unrecognized.
///
/// An unknown action must still reach the dispatcher so it can answer
/// with a failure acknowledgment naming the action, rather than being
/// dropped as a decode error at the bus layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommandAction {
    Display,
    Clear,
    Status,
    Unknown(String),
}

impl From<String> for CommandAction {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "display" => Self::Display,
            "clear" => Self::Clear,
            "status" => Self::Status,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<CommandAction> for String {
    fn from(action: CommandAction) -> Self {
        match action {
            CommandAction::Display => "display".into(),
            CommandAction::Clear => "clear".into(),
            CommandAction::Status => "status".into(),
            CommandAction::Unknown(raw) => raw,
        }
    }
}

impl std::fmt::Display for CommandAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Display => f.write_str("display"),
            Self::Clear => f.write_str("clear"),
            Self::Status => f.write_str("status"),
            Self::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// Command received on `inky/{device_id}/command`.
///
/// Field validity depends on the action: `display` requires both
/// `image_path` and `image_id`; `clear` and `status` require neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayCommand {
    pub action: CommandAction,

    #[serde(default)]
    pub image_path: Option<String>,

    #[serde(default)]
    pub image_id: Option<String>,

    #[serde(default)]
    pub title: Option<String>,
}

// ── Acknowledgments ──────────────────────────────────────────────────

/// Per-command status report published to `inky/{device_id}/status`.
///
/// Exactly one is emitted per processed command, success or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAcknowledge {
    pub device_id: String,

    /// The image currently believed displayed, if any.
    #[serde(default)]
    pub image_id: Option<String>,

    pub successful_display_change: bool,

    #[serde(default)]
    pub error: Option<String>,
}

// ── Tests ────────────────────────────────────────────────────────────
