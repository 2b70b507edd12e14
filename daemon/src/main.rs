mod access;
mod config;
mod console;
mod controller;
mod debounce;
mod event;
mod feedback;
mod paths;
mod request;
mod session;
mod sim;
mod sink;
mod status;
mod trigger;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::access::{Authorization, PromptAccessGate};
use crate::controller::Controller;
use crate::event::DaemonEvent;
use crate::session::{DeviceRequirements, DeviceSessionManager};
use crate::sim::{SimulatedCamera, SimulatedVolume};
use crate::sink::{ArtifactSink, DirectorySink};

/// Level the simulated volume starts at before the first baseline reset.
const INITIAL_VOLUME: f32 = 0.75;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir();
    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        error!("failed to create app data directory {}: {e}", app_dir.display());
        std::process::exit(1);
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::config_file_path();
    let initial_config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        warn!("config error (using defaults): {e:#}");
        config::Config::default()
    });

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(32);

    // ── Capture session ───────────────────────────────────────────────────────
    let sink = Arc::new(DirectorySink::new(initial_config.output.resolved_artifact_dir()));
    let requirements = DeviceRequirements {
        position: initial_config.session.camera_position,
        lens: initial_config.session.lens,
    };
    let (session, session_task) = DeviceSessionManager::spawn(
        SimulatedCamera::new(initial_config.simulation.clone()),
        requirements,
        initial_config.session.pending_timeout(),
        Arc::clone(&sink) as Arc<dyn ArtifactSink>,
        event_tx.clone(),
    );

    controller::forward(session.subscribe(), event_tx.clone(), DaemonEvent::SessionChanged);

    // ── Physical trigger ──────────────────────────────────────────────────────
    let volume = SimulatedVolume::new(INITIAL_VOLUME);
    let buttons = volume.buttons();
    let (monitor, monitor_task) = {
        let tx = event_tx.clone();
        trigger::spawn(
            volume,
            &initial_config.trigger,
            Box::new(move || {
                if let Err(e) = tx.try_send(DaemonEvent::TriggerFired) {
                    warn!("trigger dropped: {e}");
                }
            }),
        )
    };
    controller::forward(monitor.armed(), event_tx.clone(), DaemonEvent::TriggerArmed);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path, event_tx.clone()));
    tokio::spawn(console::run(buttons, event_tx.clone()));

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    // ── Controller ────────────────────────────────────────────────────────────
    let mut controller = Controller::new(
        session,
        monitor,
        PromptAccessGate::new(Authorization::from(initial_config.access.camera)),
        sink,
        event_tx.clone(),
        paths::status_file_path(),
    );
    // The daemon starts in the foreground; the console reports later changes.
    controller.begin();

    info!("luma-daemon v{} started; {}", env!("CARGO_PKG_VERSION"), console::HELP);

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        if !controller.handle(evt) {
            break;
        }
    }

    // Nothing reads events from here on; pending sends fail instead of blocking.
    drop(event_rx);
    controller.shutdown(session_task, monitor_task).await;
}
