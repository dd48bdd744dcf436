//! Display sink over the blocking panel boundary.
//!
//! The vendor e-paper refresh blocks for roughly 20–25 seconds, so the
//! async side never touches a panel directly: [`DisplaySink`] offloads
//! every call to a blocking worker behind an exclusive single-permit
//! gate, serializing refreshes even if two were somehow triggered
//! concurrently. Pixel dimensions are validated before any hardware is
//! driven — the image producer is responsible for correct sizing.

use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{Rgb, RgbImage};
use tokio::sync::Semaphore;

use crate::error::CoreError;

/// Saturation used for the white clear frame.
const CLEAR_SATURATION: f32 = 0.5;

// ── Panel boundary ───────────────────────────────────────────────────

/// The blocking vendor hardware boundary.
///
/// Implementations may block the calling thread for the full refresh
/// duration; callers must go through [`DisplaySink`].
pub trait Panel: Send + Sync {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn model(&self) -> &str;

    /// Drive the panel with a full frame. Blocks until the refresh
    /// completes.
    fn show(&self, frame: &RgbImage, saturation: f32) -> Result<(), CoreError>;
}

// ── Mock panel ───────────────────────────────────────────────────────

/// In-memory panel for mock mode and tests. Records the last frame and
/// a refresh counter for inspection.
pub struct MockPanel {
    width: u32,
    height: u32,
    last_frame: Mutex<Option<RgbImage>>,
    show_count: AtomicUsize,
}

impl MockPanel {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            last_frame: Mutex::new(None),
            show_count: AtomicUsize::new(0),
        }
    }

    /// The last frame driven to the panel, if any.
    pub fn last_frame(&self) -> Option<RgbImage> {
        self.last_frame.lock().ok().and_then(|guard| guard.clone())
    }

    /// Number of refreshes performed.
    pub fn show_count(&self) -> usize {
        self.show_count.load(Ordering::SeqCst)
    }
}

impl Panel for MockPanel {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn show(&self, frame: &RgbImage, _saturation: f32) -> Result<(), CoreError> {
        if let Ok(mut guard) = self.last_frame.lock() {
            *guard = Some(frame.clone());
        }
        self.show_count.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            width = frame.width(),
            height = frame.height(),
            "mock panel refreshed"
        );
        Ok(())
    }
}

// ── Driver panel ─────────────────────────────────────────────────────

/// Hardware panel driven through the vendor driver command.
///
/// Probes the driver at construction to discover panel dimensions; a
/// probe failure is the fatal startup fault that aborts the agent
/// before the run loop starts. Each refresh writes the frame to a
/// temporary PNG and invokes the driver, blocking ~20–25s.
pub struct DriverPanel {
    command: String,
    width: u32,
    height: u32,
    model: String,
}

impl DriverPanel {
    /// Probe the vendor driver for panel dimensions.
    ///
    /// Expects `<command> probe` to print `WIDTHxHEIGHT MODEL` on
    /// stdout, e.g. `1600x1200 inky_impression_13_spectra6`.
    pub fn probe(command: &str) -> Result<Self, CoreError> {
        let output = Command::new(command)
            .arg("probe")
            .output()
            .map_err(|e| CoreError::Display {
                message: format!("failed to initialize display: {command}: {e}"),
            })?;

        if !output.status.success() {
            return Err(CoreError::Display {
                message: format!(
                    "failed to initialize display: probe exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (width, height, model) = parse_probe_output(&stdout).ok_or_else(|| {
            CoreError::Display {
                message: format!("failed to initialize display: bad probe output {stdout:?}"),
            }
        })?;

        tracing::info!(width, height, model = %model, "display initialized");
        Ok(Self {
            command: command.to_owned(),
            width,
            height,
            model,
        })
    }
}

fn parse_probe_output(stdout: &str) -> Option<(u32, u32, String)> {
    let mut parts = stdout.split_whitespace();
    let dimensions = parts.next()?;
    let model = parts.next().unwrap_or("unknown").to_owned();

    let (width, height) = dimensions.split_once('x')?;
    Some((width.parse().ok()?, height.parse().ok()?, model))
}

impl Panel for DriverPanel {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn show(&self, frame: &RgbImage, saturation: f32) -> Result<(), CoreError> {
        let file = tempfile::Builder::new()
            .prefix("inky-frame-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| CoreError::Display {
                message: format!("writing frame: {e}"),
            })?;

        frame
            .save_with_format(file.path(), image::ImageFormat::Png)
            .map_err(|e| CoreError::Display {
                message: format!("writing frame: {e}"),
            })?;

        tracing::info!("updating display (this takes ~20-25 seconds)...");
        let output = Command::new(&self.command)
            .arg("show")
            .arg(file.path())
            .arg("--saturation")
            .arg(saturation.to_string())
            .output()
            .map_err(|e| CoreError::Display {
                message: format!("display update failed: {e}"),
            })?;

        if !output.status.success() {
            return Err(CoreError::Display {
                message: format!(
                    "display update failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        tracing::info!("display update complete");
        Ok(())
    }
}

// ── Async sink ───────────────────────────────────────────────────────

/// Async facade over a [`Panel`].
///
/// Owns the exclusive refresh gate; no two refreshes run concurrently.
#[derive(Clone)]
pub struct DisplaySink {
    panel: Arc<dyn Panel>,
    refresh_gate: Arc<Semaphore>,
}

impl DisplaySink {
    pub fn new(panel: Arc<dyn Panel>) -> Self {
        Self {
            panel,
            refresh_gate: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn width(&self) -> u32 {
        self.panel.width()
    }

    pub fn height(&self) -> u32 {
        self.panel.height()
    }

    pub fn model(&self) -> String {
        self.panel.model().to_owned()
    }

    /// Render a frame. Fails fast on a pixel-dimension mismatch, then
    /// blocks (off the async runtime) for the full refresh duration.
    pub async fn show_image(&self, frame: RgbImage, saturation: f32) -> Result<(), CoreError> {
        let (frame_w, frame_h) = frame.dimensions();
        let (panel_w, panel_h) = (self.panel.width(), self.panel.height());
        if (frame_w, frame_h) != (panel_w, panel_h) {
            return Err(CoreError::Display {
                message: format!(
                    "image size {frame_w}x{frame_h} does not match display size {panel_w}x{panel_h}"
                ),
            });
        }

        let permit = self
            .refresh_gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Internal("display refresh gate closed".into()))?;

        let panel = self.panel.clone();
        tokio::task::spawn_blocking(move || {
            let _exclusive = permit;
            panel.show(&frame, saturation)
        })
        .await
        .map_err(|e| CoreError::Internal(format!("display task failed: {e}")))?
    }

    /// Clear the panel to white.
    pub async fn clear(&self) -> Result<(), CoreError> {
        let white = RgbImage::from_pixel(
            self.panel.width(),
            self.panel.height(),
            Rgb([255, 255, 255]),
        );
        self.show_image(white, CLEAR_SATURATION).await
    }
}

// ── Tests ────────────────────────────────────────────────────────────
