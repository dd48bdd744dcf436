//! Publisher seam between the control plane and the bus.
//!
//! The dispatcher and registration coordinator publish through this
//! trait rather than holding the bus directly, so both are testable
//! without a broker.

use async_trait::async_trait;

use inky_api::bus::BusPublisher;
use inky_api::messages::{DeviceAcknowledge, DeviceRegistration};

/// Outbound publishes the control plane performs.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// At-least-once registration publish.
    async fn publish_registration(
        &self,
        registration: &DeviceRegistration,
    ) -> Result<(), inky_api::Error>;

    /// At-most-once acknowledgment publish.
    async fn publish_acknowledge(
        &self,
        acknowledge: &DeviceAcknowledge,
    ) -> Result<(), inky_api::Error>;
}

#[async_trait]
impl StatusPublisher for BusPublisher {
    async fn publish_registration(
        &self,
        registration: &DeviceRegistration,
    ) -> Result<(), inky_api::Error> {
        BusPublisher::publish_registration(self, registration).await
    }

    async fn publish_acknowledge(
        &self,
        acknowledge: &DeviceAcknowledge,
    ) -> Result<(), inky_api::Error> {
        BusPublisher::publish_acknowledge(self, acknowledge).await
    }
}
