//! hushkey: background daemon for global microphone mute and push-to-talk
//!
//! This daemon runs as a LaunchAgent and provides:
//! - Global hotkey detection via CGEventTap
//! - Default input device tracking and mute control via CoreAudio
//! - Push-to-talk state machine with a delayed, cancellable release
//! - IPC server for the menu bar app (status, device list, exclusions)
//!
//! The platform-independent core builds everywhere so it can be tested;
//! the daemon itself only runs on macOS. Items whose only caller is the
//! macOS `run` carry a targeted `allow(dead_code)` for other hosts.

mod app;
mod audio;
mod config;
mod events;
mod feedback;
mod hotkey;
mod ipc;
#[cfg(target_os = "macos")]
mod lifecycle;
mod state;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; HUSHKEY_LOG takes precedence over RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("HUSHKEY_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "hushkey starting");

    run().await
}

#[cfg(not(target_os = "macos"))]
async fn run() -> Result<()> {
    anyhow::bail!("unsupported platform: hushkey needs CoreAudio and CGEventTap (macOS)")
}

#[cfg(target_os = "macos")]
async fn run() -> Result<()> {
    use tokio::sync::broadcast::error::RecvError;
    use tokio::sync::{broadcast, mpsc};
    use tracing::{debug, error, warn};

    use crate::app::{App, Inputs};
    use crate::audio::CoreAudioBackend;
    use crate::config::{Config, ConfigManager};
    use crate::events::StateEvent;
    use crate::feedback::{AvPermission, Feedback, Silent, SoundPlayer};
    use crate::hotkey::HotkeyListener;
    use crate::ipc::Server;
    use crate::lifecycle::ShutdownSignal;
    use crate::state::TokioScheduler;

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, ?config.settings_path, "configuration loaded");

    let manager = ConfigManager::new(config.settings_path.clone());
    let first_run = !manager.settings_path().exists();
    let settings = manager.load()?;
    if first_run {
        manager.save(&settings)?;
        info!("default settings written");
    }

    // Install signal handlers before anything can block
    let mut shutdown = ShutdownSignal::install()?;

    // Create channels for inter-component communication
    // Hotkey listener -> main loop
    let (hotkey_tx, hotkey_rx) = mpsc::channel(32);
    // CoreAudio listeners -> main loop (serial reconciliation queue)
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    // Fired timers -> main loop
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();
    // IPC server -> main loop
    let (command_tx, command_rx) = mpsc::channel(16);
    // Main loop -> IPC server, notice presenter
    let (event_tx, _event_rx) = broadcast::channel::<StateEvent>(64);

    let backend = CoreAudioBackend::new(notice_tx)?;
    let feedback: Box<dyn Feedback> = match SoundPlayer::spawn() {
        Ok(player) => Box::new(player),
        Err(e) => {
            warn!(?e, "sound player unavailable, continuing silently");
            Box::new(Silent)
        }
    };

    spawn_notice_presenter(event_tx.subscribe());

    let shortcuts = settings.shortcuts.clone();
    let mut app = App::new(
        backend,
        TokioScheduler::new(timer_tx),
        feedback,
        Box::new(AvPermission),
        settings,
        manager,
        event_tx.clone(),
    );
    app.start();

    // Create the hotkey listener
    let hotkey_listener = HotkeyListener::new(hotkey_tx, shortcuts);

    // Start the hotkey listener (runs on dedicated thread)
    match hotkey_listener.start() {
        Ok(()) => {
            info!("hotkey listener started");
        }
        Err(e) => {
            error!(?e, "failed to start hotkey listener");
            warn!("continuing without hotkey support - check Accessibility permissions");
        }
    }

    // IPC server starts from the post-startup snapshot and follows events
    let server = Server::new(&config.socket_path, app.status(), command_tx, &event_tx)?;
    let mut ipc_event_rx = event_tx.subscribe();

    let inputs = Inputs {
        hotkeys: hotkey_rx,
        notices: notice_rx,
        timers: timer_rx,
        commands: command_rx,
    };

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Hotkeys, audio notices, timers and commands
        _ = app.run(inputs) => {
            info!("main loop exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Keep the IPC status snapshot current
        _ = async {
            loop {
                match ipc_event_rx.recv().await {
                    Ok(event) => {
                        debug!(%event, "state event");
                        server.apply_event(&event).await;
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(skipped = n, "state event receiver lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        } => {
            info!("state event handler exited");
        }

        // Wait for shutdown signal
        reason = shutdown.wait() => {
            info!(%reason, "shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    hotkey_listener.stop();
    server.shutdown().await;
    // Removes the CoreAudio property listeners
    drop(app);

    info!("hushkey stopped");

    Ok(())
}

/// Show user-facing notices as system notifications
#[cfg(target_os = "macos")]
fn spawn_notice_presenter(
    mut event_rx: tokio::sync::broadcast::Receiver<events::StateEvent>,
) {
    use tokio::sync::broadcast::error::RecvError;

    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(events::StateEvent::Notice { notice }) => {
                    // notify-rust and `open` block
                    let shown = tokio::task::spawn_blocking(move || feedback::present(notice));
                    if let Err(e) = shown.await {
                        tracing::warn!(?e, "notice presenter task failed");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "notice presenter lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
