pub mod config;
pub mod controller;
pub mod engine;
pub mod filter;
pub mod mapping;
pub mod output;
pub mod touch;

use crate::config::Tunables;
use crate::controller::event_collector::{CollectorHandle, CollectorSettings};
use crate::controller::polling::spawn_polling_loop;
use crate::engine::EngineHandle;
use crate::mapping::Profile;
use crate::output::device::VirtualOutputDevice;
use crate::output::{run_output_worker, Dispatcher, NullSink, OutputSink};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    // Profile and resolved tunables
    let profile = Arc::new(Profile::load_or_default());
    let tunables = Tunables::with_overrides(&profile.tunables);
    info!("Active profile: {}", profile.name);

    let shutdown = CancellationToken::new();

    // Output worker: virtual uinput device, logging sink as fallback
    let (output_sender, output_receiver) = mpsc::channel(1000);
    let sink: Box<dyn OutputSink> = match VirtualOutputDevice::new("padmap virtual input") {
        Ok(device) => Box::new(device),
        Err(e) => {
            warn!("Could not create uinput device ({}), falling back to logging sink", e);
            Box::new(NullSink)
        }
    };
    let output_task = tokio::spawn(run_output_worker(
        output_receiver,
        sink,
        shutdown.clone(),
    ));

    // Classification engine
    let (event_sender, event_receiver) = mpsc::channel(1000);
    let engine_handle = EngineHandle::spawn(
        profile.clone(),
        event_receiver,
        Dispatcher::new(output_sender.clone()),
        shutdown.clone(),
    );

    // Controller input
    let collector = CollectorHandle::spawn(
        Some(CollectorSettings {
            joystick_deadzone: tunables.joystick_deadzone,
        }),
        event_sender,
        shutdown.clone(),
    )
    .map_err(|e| eyre!("Failed to spawn collector: {}", e))?;

    // Continuous-motion polling loop. The profile watch stays in main so
    // external collaborators (UI, profile storage) can switch profiles by
    // sending through it and the engine's command channel together.
    let (profile_sender, profile_receiver) = watch::channel(profile);
    let _engine_commands = engine_handle.command_sender();
    let polling_task = spawn_polling_loop(
        tunables,
        profile_receiver,
        collector.stick_receiver(),
        engine_handle.routing_receiver(),
        Dispatcher::new(output_sender),
        None,
        shutdown.clone(),
    );

    info!("padmap running, press Ctrl-C to exit");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    shutdown.cancel();
    let _ = polling_task.await;
    let _ = output_task.await;
    drop(profile_sender);

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
