// ── Registration coordinator ──
//
// Drives the startup handshake: announce device capabilities, wait for
// the acknowledgment, retry with capped backoff until acknowledged.
// Runs once per process lifetime — after success it returns permanently
// and never re-registers, even across bus reconnects.
//
// The acknowledgment arrives out-of-band (bus → dispatcher → registered
// signal). The signal is a level-triggered watch channel, so an ack
// that lands before a wait window opens is still observed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use inky_api::Backoff;
use inky_api::messages::DeviceRegistration;

use crate::publish::StatusPublisher;

const ACK_WAIT: Duration = Duration::from_secs(30);
const RETRY_FLOOR: Duration = Duration::from_secs(10);
const RETRY_CAP: Duration = Duration::from_secs(60);

enum Attempt {
    Registered,
    TimedOut,
    PublishFailed,
    SignalClosed,
}

pub struct RegistrationCoordinator {
    request: DeviceRegistration,
    publisher: Arc<dyn StatusPublisher>,
    registered: watch::Receiver<bool>,
}

impl RegistrationCoordinator {
    /// `request` is built once from the device identity and discovered
    /// display capabilities; every retry sends it unchanged.
    pub fn new(
        request: DeviceRegistration,
        publisher: Arc<dyn StatusPublisher>,
        registered: watch::Receiver<bool>,
    ) -> Self {
        Self {
            request,
            publisher,
            registered,
        }
    }

    /// Retry loop: publish → wait up to 30s for the registered signal →
    /// on timeout or publish failure, sleep the backoff interval and
    /// try again. Returns once registered or cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(RETRY_FLOOR, RETRY_CAP);

        loop {
            if *self.registered.borrow() {
                tracing::info!("registration successful");
                return;
            }

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                attempt = self.attempt() => attempt,
            };

            match attempt {
                Attempt::Registered => {
                    tracing::info!("registration successful");
                    return;
                }
                Attempt::SignalClosed => {
                    // Dispatcher is gone; the supervisor is tearing down.
                    tracing::debug!("registered signal closed, abandoning registration");
                    return;
                }
                Attempt::TimedOut | Attempt::PublishFailed => {}
            }

            let delay = backoff.next();
            tracing::warn!(
                retry_secs = delay.as_secs(),
                "registration not acknowledged, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(&mut self) -> Attempt {
        tracing::info!(device_id = %self.request.device_id, "sending registration");
        if let Err(e) = self.publisher.publish_registration(&self.request).await {
            tracing::warn!(error = %e, "registration publish failed");
            return Attempt::PublishFailed;
        }

        match tokio::time::timeout(ACK_WAIT, self.registered.wait_for(|r| *r)).await {
            Ok(Ok(_)) => Attempt::Registered,
            Ok(Err(_)) => Attempt::SignalClosed,
            Err(_) => Attempt::TimedOut,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
