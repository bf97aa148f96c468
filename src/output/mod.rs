//! Output sink for synthesized input
//!
//! The engine never talks to the OS directly; it emits [`OutputCommand`]s
//! into a bounded channel and a dedicated worker drives a concrete
//! [`OutputSink`]. The default sink is a virtual uinput keyboard/mouse
//! ([`device::VirtualOutputDevice`]); tests consume the channel directly.

pub mod device;

use crate::mapping::Action;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Command stream from the engine to the output worker.
#[derive(Clone, Debug, PartialEq)]
pub enum OutputCommand {
    /// Fire a discrete action once.
    Execute(Action),
    /// Begin a hold-style action (modifier down, mouse button down, ...).
    StartHold(Action),
    /// End a previously started hold.
    StopHold(Action),
    /// Relative pointer motion.
    MoveCursor { dx: f64, dy: f64 },
    /// Scroll delta; `momentum` marks post-lift continuation ticks.
    Scroll { dx: f64, dy: f64, momentum: bool },
}

// Output errors
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to create virtual device: {0}")]
    CreateDevice(#[source] std::io::Error),

    #[error("Failed to emit event: {0}")]
    EmitEvent(#[source] std::io::Error),

    #[error("Unknown key name: {0}")]
    UnknownKey(String),
}

/// Cheap cloneable handle for pushing commands into the output channel
/// without blocking. A full channel drops the command with a warning; the
/// engine must never stall on a slow sink.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    sender: mpsc::Sender<OutputCommand>,
}

impl Dispatcher {
    pub fn new(sender: mpsc::Sender<OutputCommand>) -> Self {
        Self { sender }
    }

    pub fn send(&self, command: OutputCommand) {
        match self.sender.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                warn!("Output channel full, dropping {:?}", command);
            }
            Err(mpsc::error::TrySendError::Closed(command)) => {
                debug!("Output channel closed, dropping {:?}", command);
            }
        }
    }
}

/// Backend that realizes output commands. Implementations must be cheap to
/// call; the worker runs them inline on its task.
pub trait OutputSink: Send {
    fn execute(&mut self, action: &Action) -> Result<(), OutputError>;
    fn start_hold(&mut self, action: &Action) -> Result<(), OutputError>;
    fn stop_hold(&mut self, action: &Action) -> Result<(), OutputError>;
    fn move_cursor(&mut self, dx: f64, dy: f64) -> Result<(), OutputError>;
    fn scroll(&mut self, dx: f64, dy: f64, momentum: bool) -> Result<(), OutputError>;
}

/// Fallback sink that only logs, used when uinput is not available.
pub struct NullSink;

impl OutputSink for NullSink {
    fn execute(&mut self, action: &Action) -> Result<(), OutputError> {
        info!("Output (no device): execute {:?}", action);
        Ok(())
    }

    fn start_hold(&mut self, action: &Action) -> Result<(), OutputError> {
        info!("Output (no device): start hold {:?}", action);
        Ok(())
    }

    fn stop_hold(&mut self, action: &Action) -> Result<(), OutputError> {
        info!("Output (no device): stop hold {:?}", action);
        Ok(())
    }

    fn move_cursor(&mut self, dx: f64, dy: f64) -> Result<(), OutputError> {
        debug!("Output (no device): move cursor {:.2},{:.2}", dx, dy);
        Ok(())
    }

    fn scroll(&mut self, dx: f64, dy: f64, momentum: bool) -> Result<(), OutputError> {
        debug!(
            "Output (no device): scroll {:.2},{:.2} momentum={}",
            dx, dy, momentum
        );
        Ok(())
    }
}

/// Consumes the engine's command stream until the channel closes or
/// shutdown is requested. Sink errors are logged and do not stop the
/// worker; a stuck output device must not stall classification.
pub async fn run_output_worker(
    mut receiver: mpsc::Receiver<OutputCommand>,
    mut sink: Box<dyn OutputSink>,
    shutdown: CancellationToken,
) {
    info!("Output worker started");
    loop {
        tokio::select! {
            command = receiver.recv() => {
                let Some(command) = command else {
                    warn!("Output channel closed, stopping worker");
                    break;
                };
                debug!("Output command: {:?}", command);
                let result = match &command {
                    OutputCommand::Execute(action) => sink.execute(action),
                    OutputCommand::StartHold(action) => sink.start_hold(action),
                    OutputCommand::StopHold(action) => sink.stop_hold(action),
                    OutputCommand::MoveCursor { dx, dy } => sink.move_cursor(*dx, *dy),
                    OutputCommand::Scroll { dx, dy, momentum } => {
                        sink.scroll(*dx, *dy, *momentum)
                    }
                };
                if let Err(e) = result {
                    error!("Output sink error for {:?}: {}", command, e);
                }
            }
            _ = shutdown.cancelled() => {
                info!("Output worker cancelled");
                break;
            }
        }
    }
}
