// ── Lifecycle supervisor ──
//
// Wires the transport and control plane together and runs the three
// long-lived tasks: the bus session's receive/reconnect loop, the
// registration coordinator's retry loop, and the sequential command
// dispatcher. On an external shutdown request or any unexpected task
// exit, cancels the rest, awaits their termination, and cleans up.
//
// Cancellation takes effect at suspension points: a shutdown that
// lands mid-refresh waits out the remaining hardware time.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use inky_api::bus::{BusEvents, BusSession};
use inky_api::messages::{DeviceRegistration, DisplayInfo};
use inky_api::storage::ImageStore;

use crate::config::AgentConfig;
use crate::controller::DisplayController;
use crate::display::{DisplaySink, Panel};
use crate::error::CoreError;
use crate::publish::StatusPublisher;
use crate::registration::RegistrationCoordinator;

/// How one supervised task ended. A task that finishes while its token
/// is live is a fault; an exit after cancellation is orderly shutdown.
/// The registration loop is the exception — completing is its success
/// case.
struct TaskExit {
    name: &'static str,
    fault: bool,
}

impl TaskExit {
    fn from_token(name: &'static str, token: &CancellationToken) -> Self {
        Self {
            name,
            fault: !token.is_cancelled(),
        }
    }
}

/// The assembled agent: everything constructed, nothing running until
/// [`run`](Self::run).
pub struct Agent {
    session: BusSession,
    events: BusEvents,
    controller: DisplayController,
    coordinator: RegistrationCoordinator,
    shutdown: CancellationToken,
}

impl Agent {
    /// Wire up the full agent from resolved configuration and a panel.
    ///
    /// Display capabilities for the registration request are discovered
    /// from the panel here, once, and never change afterwards.
    pub fn new(config: &AgentConfig, panel: Arc<dyn Panel>) -> Self {
        let (session, events, bus_publisher) = BusSession::new(&config.bus, &config.device.id);

        let store = Arc::new(ImageStore::new());
        if let Some(defaults) = &config.store_defaults {
            store.configure(defaults.clone());
        }

        let sink = DisplaySink::new(panel);
        let (registered_tx, registered_rx) = watch::channel(false);
        let publisher: Arc<dyn StatusPublisher> = Arc::new(bus_publisher);

        let request = DeviceRegistration {
            device_id: config.device.id.clone(),
            display: DisplayInfo {
                width: sink.width(),
                height: sink.height(),
                orientation: config.display.orientation,
                model: sink.model(),
            },
            room: config.device.room.clone(),
        };

        let controller = DisplayController::new(
            config.device.id.clone(),
            config.display.saturation,
            store,
            sink,
            publisher.clone(),
            registered_tx,
        );
        let coordinator = RegistrationCoordinator::new(request, publisher, registered_rx);

        Self {
            session,
            events,
            controller,
            coordinator,
            shutdown: CancellationToken::new(),
        }
    }

    /// Handle for requesting graceful shutdown. Idempotent: cancelling
    /// twice has no additional effect.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until shutdown or an unrecoverable task fault. Returns only
    /// after every task has terminated and cleanup completed.
    pub async fn run(self) -> Result<(), CoreError> {
        let Self {
            session,
            events,
            controller,
            coordinator,
            shutdown,
        } = self;

        tracing::info!("starting display agent");

        let runtime = CancellationToken::new();
        let mut tasks: JoinSet<TaskExit> = JoinSet::new();

        {
            let token = runtime.child_token();
            tasks.spawn(async move {
                session.run(token.clone()).await;
                TaskExit::from_token("bus-session", &token)
            });
        }
        {
            let token = runtime.child_token();
            tasks.spawn(async move {
                coordinator.run(token).await;
                // Completing is this task's success case.
                TaskExit {
                    name: "registration",
                    fault: false,
                }
            });
        }
        {
            let token = runtime.child_token();
            tasks.spawn(async move {
                dispatch_loop(controller, events, token.clone()).await;
                TaskExit::from_token("dispatcher", &token)
            });
        }

        let mut shutdown_seen = false;
        let mut fault = false;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled(), if !shutdown_seen => {
                    shutdown_seen = true;
                    tracing::info!("shutdown requested, stopping tasks");
                    runtime.cancel();
                }
                exit = tasks.join_next() => match exit {
                    None => break,
                    Some(Ok(exit)) if exit.fault => {
                        tracing::error!(task = exit.name, "task exited unexpectedly, stopping agent");
                        fault = true;
                        runtime.cancel();
                    }
                    Some(Ok(exit)) => {
                        tracing::debug!(task = exit.name, "task finished");
                    }
                    Some(Err(e)) if e.is_panic() => {
                        tracing::error!(error = %e, "task panicked, stopping agent");
                        fault = true;
                        runtime.cancel();
                    }
                    Some(Err(_)) => {}
                }
            }
        }

        // All tasks have terminated. The bus session marked itself
        // disconnected on exit; the store and display sink drop with
        // the dispatcher.
        tracing::info!("cleaning up resources");
        tracing::info!("display agent stopped");

        if fault {
            Err(CoreError::Internal("agent task failed".into()))
        } else {
            Ok(())
        }
    }
}

/// Sequential dispatch: commands are handled one at a time in arrival
/// order; registration responses take priority between commands. A
/// command that triggers a slow refresh blocks the queue for its
/// duration — accepted behavior for a single-panel device.
async fn dispatch_loop(
    mut controller: DisplayController,
    mut events: BusEvents,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            response = events.registrations.recv() => match response {
                Some(response) => controller.apply_registration(&response),
                None => break,
            },
            command = events.commands.recv() => match command {
                Some(command) => controller.handle_command(command).await,
                None => break,
            },
        }
    }

    tracing::debug!("dispatch loop exiting");
}

// ── Tests ────────────────────────────────────────────────────────────
