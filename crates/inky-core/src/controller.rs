// ── Command dispatcher ──
//
// Owns the device state and routes every inbound command to the right
// action. Two invariants hold on every path: state mutates only after
// the display sink call returns without error, and exactly one
// acknowledgment publish is attempted per command — no error escapes
// past this boundary.

use std::sync::Arc;

use tokio::sync::watch;

use inky_api::messages::{CommandAction, DeviceAcknowledge, DisplayCommand, RegistrationResponse};
use inky_api::storage::{ImageStore, StoreCredentials};

use crate::display::DisplaySink;
use crate::error::CoreError;
use crate::publish::StatusPublisher;

pub struct DisplayController {
    device_id: String,
    saturation: f32,
    store: Arc<ImageStore>,
    sink: DisplaySink,
    publisher: Arc<dyn StatusPublisher>,
    registered_tx: watch::Sender<bool>,
    current_image_id: Option<String>,
}

impl DisplayController {
    pub fn new(
        device_id: String,
        saturation: f32,
        store: Arc<ImageStore>,
        sink: DisplaySink,
        publisher: Arc<dyn StatusPublisher>,
        registered_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            device_id,
            saturation,
            store,
            sink,
            publisher,
            registered_tx,
            current_image_id: None,
        }
    }

    /// The image currently believed displayed.
    pub fn current_image_id(&self) -> Option<&str> {
        self.current_image_id.as_deref()
    }

    // ── Registration ─────────────────────────────────────────────

    /// Apply a registration response: install store credentials and
    /// flip the level-triggered registered signal. Duplicates simply
    /// overwrite the credentials.
    pub fn apply_registration(&self, response: &RegistrationResponse) {
        tracing::info!(
            status = ?response.status,
            endpoint = %response.minio_endpoint,
            "received registration response"
        );

        self.store.configure(StoreCredentials::from(response));
        self.registered_tx.send_replace(true);
    }

    // ── Dispatch ─────────────────────────────────────────────────

    /// Process one command. Always terminates by attempting exactly
    /// one acknowledgment publish; never propagates an error.
    pub async fn handle_command(&mut self, command: DisplayCommand) {
        tracing::info!(
            action = %command.action,
            image_id = command.image_id.as_deref().unwrap_or("<none>"),
            title = command.title.as_deref().unwrap_or("<none>"),
            "received command"
        );

        let outcome = match &command.action {
            CommandAction::Display => self.handle_display(&command).await,
            CommandAction::Clear => self.handle_clear().await,
            // Pure state report, no I/O; image id falls back to the
            // current one inside send_acknowledge.
            CommandAction::Status => {
                self.send_acknowledge(None, true, None).await;
                Ok(())
            }
            CommandAction::Unknown(raw) => Err(CoreError::InvalidCommand {
                message: format!("unknown action: {raw}"),
            }),
        };

        if let Err(e) = outcome {
            let error_text = match &e {
                CoreError::Communication { .. }
                | CoreError::Display { .. }
                | CoreError::InvalidCommand { .. } => {
                    tracing::warn!(action = %command.action, error = %e, "command failed");
                    e.to_string()
                }
                CoreError::Config { .. } | CoreError::Internal(_) => {
                    tracing::error!(
                        action = %command.action,
                        error = %e,
                        "unexpected error handling command"
                    );
                    format!("unexpected error: {e}")
                }
            };

            self.send_acknowledge(command.image_id.clone(), false, Some(error_text))
                .await;
        }
    }

    /// Fetch and display an image, then acknowledge success.
    async fn handle_display(&mut self, command: &DisplayCommand) -> Result<(), CoreError> {
        let (Some(image_path), Some(image_id)) = (&command.image_path, &command.image_id) else {
            return Err(CoreError::InvalidCommand {
                message: "display command requires image_path and image_id".into(),
            });
        };

        tracing::info!(path = %image_path, "fetching image");
        let image = self.store.fetch_image(image_path).await?;

        tracing::info!(image_id = %image_id, "displaying image");
        self.sink.show_image(image.to_rgb8(), self.saturation).await?;

        self.current_image_id = Some(image_id.clone());
        self.send_acknowledge(Some(image_id.clone()), true, None)
            .await;
        Ok(())
    }

    /// Blank the panel, then acknowledge success.
    async fn handle_clear(&mut self) -> Result<(), CoreError> {
        tracing::info!("clearing display");
        self.sink.clear().await?;
        self.current_image_id = None;

        self.send_acknowledge(None, true, None).await;
        Ok(())
    }

    /// Publish an acknowledgment. A delivery failure is logged and
    /// swallowed — acknowledgments are fire-and-forget.
    async fn send_acknowledge(
        &self,
        image_id: Option<String>,
        success: bool,
        error: Option<String>,
    ) {
        let acknowledge = DeviceAcknowledge {
            device_id: self.device_id.clone(),
            image_id: image_id.or_else(|| self.current_image_id.clone()),
            successful_display_change: success,
            error,
        };

        if let Err(e) = self.publisher.publish_acknowledge(&acknowledge).await {
            tracing::warn!(error = %e, "failed to publish acknowledgment");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
