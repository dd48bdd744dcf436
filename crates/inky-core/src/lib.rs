// inky-core: Control plane for the inkyd display agent.
//
// Everything between the transport layer (inky-api) and the binary:
// the command dispatcher, the registration coordinator, the display
// sink over the blocking panel boundary, and the lifecycle supervisor
// that runs them as concurrent tasks.

pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod publish;
pub mod registration;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{AgentConfig, DeviceIdentity, DisplaySettings};
pub use controller::DisplayController;
pub use display::{DisplaySink, DriverPanel, MockPanel, Panel};
pub use error::CoreError;
pub use publish::StatusPublisher;
pub use registration::RegistrationCoordinator;
pub use supervisor::Agent;
