// End-to-end dispatch tests: a real ImageStore against a wiremock
// object store, a mock panel, and a recording publisher.

use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use inky_api::messages::{
    CommandAction, DeviceAcknowledge, DeviceRegistration, DisplayCommand, RegistrationResponse,
};
use inky_api::storage::ImageStore;
use inky_core::display::{DisplaySink, MockPanel};
use inky_core::publish::StatusPublisher;
use inky_core::registration::RegistrationCoordinator;
use inky_core::DisplayController;

// ── Test doubles ─────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingPublisher {
    acks: Mutex<Vec<DeviceAcknowledge>>,
    registrations: Mutex<Vec<DeviceRegistration>>,
}

#[async_trait]
impl StatusPublisher for RecordingPublisher {
    async fn publish_registration(
        &self,
        registration: &DeviceRegistration,
    ) -> Result<(), inky_api::Error> {
        self.registrations.lock().await.push(registration.clone());
        Ok(())
    }

    async fn publish_acknowledge(
        &self,
        acknowledge: &DeviceAcknowledge,
    ) -> Result<(), inky_api::Error> {
        self.acks.lock().await.push(acknowledge.clone());
        Ok(())
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

struct Fixture {
    controller: DisplayController,
    panel: Arc<MockPanel>,
    publisher: Arc<RecordingPublisher>,
    registered_rx: watch::Receiver<bool>,
    server: MockServer,
}

async fn fixture() -> Fixture {
    let server = MockServer::start().await;
    let panel = Arc::new(MockPanel::new(1600, 1200));
    let publisher = Arc::new(RecordingPublisher::default());
    let (registered_tx, registered_rx) = watch::channel(false);

    let controller = DisplayController::new(
        "test-device".into(),
        0.5,
        Arc::new(ImageStore::new()),
        DisplaySink::new(panel.clone()),
        publisher.clone(),
        registered_tx,
    );

    Fixture {
        controller,
        panel,
        publisher,
        registered_rx,
        server,
    }
}

fn registration_response(server: &MockServer) -> RegistrationResponse {
    let endpoint = server
        .uri()
        .strip_prefix("http://")
        .map(str::to_owned)
        .unwrap_or_else(|| server.uri());

    serde_json::from_value(serde_json::json!({
        "status": "registered",
        "minio_endpoint": endpoint,
        "minio_bucket": "test-images",
        "minio_access_key": "test-access-key",
        "minio_secret_key": "test-secret-key",
        "minio_secure": false,
    }))
    .unwrap()
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let frame = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
    let mut cursor = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(frame)
        .write_to(&mut cursor, image::ImageOutputFormat::Png)
        .unwrap();
    cursor.into_inner()
}

async fn serve_object(server: &MockServer, object: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/test-images/{object}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

fn display_command(image_path: &str, image_id: &str) -> DisplayCommand {
    DisplayCommand {
        action: CommandAction::Display,
        image_path: Some(image_path.into()),
        image_id: Some(image_id.into()),
        title: Some("Test Image".into()),
    }
}

// ── Scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn display_command_succeeds_end_to_end() {
    let mut f = fixture().await;
    serve_object(&f.server, "a.png", png_bytes(1600, 1200)).await;
    f.controller.apply_registration(&registration_response(&f.server));

    f.controller.handle_command(display_command("a.png", "123")).await;

    let acks = f.publisher.acks.lock().await.clone();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].image_id.as_deref(), Some("123"));
    assert!(acks[0].successful_display_change);
    assert_eq!(acks[0].error, None);

    assert_eq!(f.controller.current_image_id(), Some("123"));
    assert_eq!(f.panel.show_count(), 1);
    assert_eq!(
        f.panel.last_frame().map(|frame| frame.dimensions()),
        Some((1600, 1200))
    );
}

#[tokio::test]
async fn wrongly_sized_image_is_rejected_with_both_sizes() {
    let mut f = fixture().await;
    serve_object(&f.server, "small.png", png_bytes(800, 600)).await;
    f.controller.apply_registration(&registration_response(&f.server));

    f.controller.handle_command(display_command("small.png", "456")).await;

    let acks = f.publisher.acks.lock().await.clone();
    assert_eq!(acks.len(), 1);
    assert!(!acks[0].successful_display_change);
    let error = acks[0].error.as_deref().unwrap();
    assert!(error.contains("800x600"), "{error}");
    assert!(error.contains("1600x1200"), "{error}");

    // State untouched, no hardware driven.
    assert_eq!(f.controller.current_image_id(), None);
    assert_eq!(f.panel.show_count(), 0);
}

#[tokio::test]
async fn store_fetch_failure_produces_failure_ack() {
    let mut f = fixture().await;
    // No mock mounted: the GET returns 404.
    f.controller.apply_registration(&registration_response(&f.server));

    f.controller.handle_command(display_command("gone.png", "789")).await;

    let acks = f.publisher.acks.lock().await.clone();
    assert_eq!(acks.len(), 1);
    assert!(!acks[0].successful_display_change);
    assert!(acks[0].error.is_some());
    assert_eq!(f.panel.show_count(), 0);
}

#[tokio::test]
async fn clear_after_display_resets_current_image() {
    let mut f = fixture().await;
    serve_object(&f.server, "a.png", png_bytes(1600, 1200)).await;
    f.controller.apply_registration(&registration_response(&f.server));

    f.controller.handle_command(display_command("a.png", "123")).await;
    assert_eq!(f.controller.current_image_id(), Some("123"));

    f.controller
        .handle_command(DisplayCommand {
            action: CommandAction::Clear,
            image_path: None,
            image_id: None,
            title: None,
        })
        .await;

    assert_eq!(f.controller.current_image_id(), None);
    let acks = f.publisher.acks.lock().await.clone();
    assert_eq!(acks.len(), 2);
    assert!(acks[1].successful_display_change);
    assert_eq!(acks[1].image_id, None);
}

#[tokio::test]
async fn status_reflects_displayed_image() {
    let mut f = fixture().await;
    serve_object(&f.server, "a.png", png_bytes(1600, 1200)).await;
    f.controller.apply_registration(&registration_response(&f.server));

    f.controller.handle_command(display_command("a.png", "123")).await;
    let shows_after_display = f.panel.show_count();

    f.controller
        .handle_command(DisplayCommand {
            action: CommandAction::Status,
            image_path: None,
            image_id: None,
            title: None,
        })
        .await;

    let acks = f.publisher.acks.lock().await.clone();
    assert_eq!(acks.len(), 2);
    assert!(acks[1].successful_display_change);
    assert_eq!(acks[1].image_id.as_deref(), Some("123"));
    // Status performed no I/O.
    assert_eq!(f.panel.show_count(), shows_after_display);
}

#[tokio::test]
async fn registration_handshake_unblocks_display() {
    let f = fixture().await;

    // Coordinator publishes the registration request built from the
    // panel's discovered capabilities.
    let request = DeviceRegistration {
        device_id: "test-device".into(),
        display: inky_api::messages::DisplayInfo {
            width: 1600,
            height: 1200,
            orientation: inky_api::messages::Orientation::Landscape,
            model: "mock".into(),
        },
        room: Some("Test Room".into()),
    };
    let coordinator = RegistrationCoordinator::new(
        request,
        f.publisher.clone(),
        f.registered_rx.clone(),
    );

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(coordinator.run(cancel));

    // Simulate the out-of-band acknowledgment arriving via the bus.
    f.controller.apply_registration(&registration_response(&f.server));

    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("coordinator should return once registered")
        .unwrap();

    let registrations = f.publisher.registrations.lock().await;
    assert!(registrations.len() <= 1, "no re-registration after success");
    assert!(*f.registered_rx.borrow());
}
