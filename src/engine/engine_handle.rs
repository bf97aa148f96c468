//! Engine task and public handle
//!
//! The engine core is synchronous; this module wraps it in the single
//! serial tokio task that owns it. Raw events and control commands are
//! marshaled in through channels, waiting happens exclusively via
//! `sleep_until` on the timer queue's next deadline.

use crate::controller::event_collector::RawInputEvent;
use crate::engine::engine::{EngineCommand, InputEngine, RoutingState};
use crate::mapping::profile::Profile;
use crate::output::Dispatcher;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Public interface for the spawned engine task.
pub struct EngineHandle {
    command_sender: mpsc::Sender<EngineCommand>,
    routing_receiver: watch::Receiver<RoutingState>,
}

impl EngineHandle {
    /// Creates the engine and spawns its serial task.
    pub fn spawn(
        profile: Arc<Profile>,
        event_receiver: mpsc::Receiver<RawInputEvent>,
        out: Dispatcher,
        shutdown: CancellationToken,
    ) -> Self {
        info!("Spawning input engine for profile '{}'", profile.name);

        let (command_sender, command_receiver) = mpsc::channel(32);
        let (routing_sender, routing_receiver) = watch::channel(RoutingState::default());

        let engine = InputEngine::new(profile, out, routing_sender);
        let task_handle = tokio::spawn(run_engine_loop(
            engine,
            event_receiver,
            command_receiver,
            shutdown,
        ));
        debug!("Engine task spawned with handle: {:?}", task_handle);

        Self {
            command_sender,
            routing_receiver,
        }
    }

    /// Sender for control-plane commands (profile switch, chord hints,
    /// navigation intercept, frontmost app).
    pub fn command_sender(&self) -> mpsc::Sender<EngineCommand> {
        self.command_sender.clone()
    }

    /// Receiver for the routing gates consumed by the polling loop.
    pub fn routing_receiver(&self) -> watch::Receiver<RoutingState> {
        self.routing_receiver.clone()
    }
}

async fn run_engine_loop(
    mut engine: InputEngine,
    mut events: mpsc::Receiver<RawInputEvent>,
    mut commands: mpsc::Receiver<EngineCommand>,
    shutdown: CancellationToken,
) {
    info!("Input engine task started");
    loop {
        let deadline = engine.next_deadline();
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => engine.handle_event(event),
                None => {
                    warn!("Event channel closed, stopping engine");
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(command) => engine.handle_command(command),
                None => {
                    warn!("Command channel closed, stopping engine");
                    break;
                }
            },
            _ = sleep_until_deadline(deadline) => {
                engine.run_due_timers(Instant::now());
            }
            _ = shutdown.cancelled() => {
                info!("Engine task cancelled");
                break;
            }
        }
    }
}

/// Pends forever when the queue is empty so the select loop only wakes on
/// events, commands or cancellation.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        }
        None => std::future::pending::<()>().await,
    }
}
