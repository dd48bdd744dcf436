// inky-api: Transport layer for the inkyd display agent.
//
// Owns everything that crosses a network boundary: the MQTT bus session
// (registration, commands, acknowledgments) and the S3-compatible
// object-store client that fetches image payloads. `inky-core` maps the
// errors from this crate into domain-appropriate variants.

pub mod backoff;
pub mod bus;
pub mod error;
pub mod messages;
pub mod storage;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backoff::Backoff;
pub use bus::{BusConfig, BusEvents, BusPublisher, BusSession, BusTransport, Topics};
pub use error::Error;
pub use messages::{
    CommandAction, DeviceAcknowledge, DeviceRegistration, DisplayCommand, DisplayInfo,
    Orientation, RegistrationResponse, RegistrationStatus,
};
pub use storage::{ImageStore, StoreCredentials};
