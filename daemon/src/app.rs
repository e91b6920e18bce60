//! The main loop
//!
//! `App` owns the audio monitor and the state machine and is the only
//! place either is touched. Hotkeys, OS notices, fired timers and IPC
//! commands all arrive on channels and are handled one at a time, so
//! reconciliation and user actions never interleave.

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::audio::{AudioBackend, AudioMonitor, MonitorSignal, SystemNotice};
use crate::config::{ConfigManager, Settings};
use crate::events::StateEvent;
use crate::feedback::{Feedback, PermissionCheck};
use crate::hotkey::HotkeyEvent;
use crate::ipc::{Command, CommandRequest, DaemonStatus, Response};
use crate::state::{Scheduler, StateMachine, TimerToken};

/// Everything the main loop listens to
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub struct Inputs {
    pub hotkeys: mpsc::Receiver<HotkeyEvent>,
    pub notices: mpsc::UnboundedReceiver<SystemNotice>,
    pub timers: mpsc::UnboundedReceiver<TimerToken>,
    pub commands: mpsc::Receiver<CommandRequest>,
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub struct App<B: AudioBackend, S: Scheduler> {
    monitor: AudioMonitor<B>,
    machine: StateMachine<S>,
    settings: Settings,
    config: ConfigManager,
    event_tx: broadcast::Sender<StateEvent>,
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
impl<B: AudioBackend, S: Scheduler> App<B, S> {
    pub fn new(
        backend: B,
        scheduler: S,
        feedback: Box<dyn Feedback>,
        permission: Box<dyn PermissionCheck>,
        settings: Settings,
        config: ConfigManager,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Self {
        let monitor = AudioMonitor::new(
            backend,
            settings.excluded_device_uids.clone(),
            event_tx.clone(),
        );
        let machine = StateMachine::new(&settings, scheduler, feedback, permission, event_tx.clone());
        Self {
            monitor,
            machine,
            settings,
            config,
            event_tx,
        }
    }

    /// Bind the default device and put the mic in its resting state
    pub fn start(&mut self) {
        self.monitor.start();
        self.machine.start(&mut self.monitor);
    }

    /// Snapshot for the IPC server to start from
    pub fn status(&self) -> DaemonStatus {
        let state = self.machine.state();
        DaemonStatus {
            muted: self.monitor.is_muted(),
            ptt_enabled: self.machine.ptt_enabled(),
            ptt_active: state.is_active(),
            countdown: state.countdown(),
            device: self.monitor.current_device(),
            visual_feedback: self.settings.visual_feedback,
            ..DaemonStatus::default()
        }
    }

    /// Process inputs until every input channel has closed
    pub async fn run(&mut self, mut inputs: Inputs) {
        info!("main loop started");

        loop {
            tokio::select! {
                Some(event) = inputs.hotkeys.recv() => self.handle_hotkey(event),
                Some(notice) = inputs.notices.recv() => self.handle_notice(notice),
                Some(token) = inputs.timers.recv() => {
                    self.machine.handle_timer(token, &mut self.monitor);
                }
                Some(request) = inputs.commands.recv() => {
                    let response = self.handle_command(request.command);
                    if request.reply.send(response).is_err() {
                        debug!("command requester went away");
                    }
                }
                else => break,
            }
        }

        info!("main loop stopped");
    }

    pub fn handle_hotkey(&mut self, event: HotkeyEvent) {
        self.machine.handle_hotkey(event, &mut self.monitor);

        // The mode toggle is the one setting the core writes
        let enabled = self.machine.ptt_enabled();
        if enabled != self.settings.ptt_enabled {
            self.settings.ptt_enabled = enabled;
            self.persist(|on_disk| on_disk.ptt_enabled = enabled);
        }
    }

    pub fn handle_notice(&mut self, notice: SystemNotice) {
        if let Some(MonitorSignal::DeviceDisconnected) = self.monitor.handle_notice(notice) {
            self.machine.handle_device_disconnected(&mut self.monitor);
        }
    }

    pub fn handle_command(&mut self, command: Command) -> Response {
        debug!(?command, "command");
        match command {
            Command::ToggleMute => {
                self.handle_hotkey(HotkeyEvent::ToggleMutePressed);
                Response::Ok
            }

            Command::ListDevices => Response::Devices {
                devices: self.monitor.devices().to_vec(),
                excluded: self.monitor.excluded().iter().cloned().collect(),
            },

            Command::SelectDevice { uid } => match self.monitor.select_input_device(&uid) {
                Ok(()) => Response::Ok,
                Err(e) => {
                    warn!(%uid, ?e, "device selection failed");
                    Response::error("device", e.to_string())
                }
            },

            Command::SetDeviceExcluded { uid, excluded } => {
                if self.monitor.set_excluded(&uid, excluded) {
                    self.settings.excluded_device_uids = self.monitor.excluded().clone();
                    self.persist(|on_disk| {
                        if excluded {
                            on_disk.excluded_device_uids.insert(uid);
                        } else {
                            on_disk.excluded_device_uids.remove(&uid);
                        }
                    });
                }
                Response::Ok
            }

            Command::ReloadSettings => match self.config.load() {
                Ok(settings) => {
                    self.apply_settings(settings);
                    Response::Ok
                }
                Err(e) => {
                    warn!(?e, "settings reload failed, keeping current settings");
                    Response::error("settings", format!("{:#}", e))
                }
            },
        }
    }

    fn apply_settings(&mut self, settings: Settings) {
        info!(path = ?self.config.settings_path(), "applying reloaded settings");

        let current = self.monitor.excluded().clone();
        for uid in current.difference(&settings.excluded_device_uids) {
            self.monitor.set_excluded(uid, false);
        }
        for uid in settings.excluded_device_uids.difference(&current) {
            self.monitor.set_excluded(uid, true);
        }

        self.machine.apply_settings(&settings, &mut self.monitor);

        if settings.visual_feedback != self.settings.visual_feedback {
            let _ = self.event_tx.send(StateEvent::VisualFeedbackChanged {
                enabled: settings.visual_feedback,
            });
        }
        if settings.shortcuts != self.settings.shortcuts {
            warn!("shortcut changes take effect after a restart");
        }

        self.settings = settings;
    }

    /// Write one field back to the settings file. The file is re-read first
    /// so edits the settings UI has not asked us to reload survive.
    fn persist(&self, update: impl FnOnce(&mut Settings)) {
        let mut on_disk = match self.config.load() {
            Ok(_) if !self.config.settings_path().exists() => self.settings.clone(),
            Ok(settings) => settings,
            Err(e) => {
                warn!(?e, "settings file unreadable, saving from memory");
                self.settings.clone()
            }
        };
        update(&mut on_disk);
        match self.config.save(&on_disk) {
            Ok(()) => debug!(path = ?self.config.settings_path(), "settings saved"),
            Err(e) => warn!(?e, "failed to save settings"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::audio::fake::FakeBackend;
    use crate::audio::DeviceId;
    use crate::events::Notice;
    use crate::feedback::Silent;
    use crate::state::{ManualScheduler, PttState};

    struct Granted;

    impl PermissionCheck for Granted {
        fn microphone_granted(&self) -> bool {
            true
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hushkey-app-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn app(
        name: &str,
        backend: &FakeBackend,
        settings: Settings,
    ) -> (App<FakeBackend, ManualScheduler>, broadcast::Receiver<StateEvent>, PathBuf) {
        let dir = temp_dir(name);
        let (tx, rx) = broadcast::channel(256);
        let mut app = App::new(
            backend.clone(),
            ManualScheduler::new(),
            Box::new(Silent),
            Box::new(Granted),
            settings,
            ConfigManager::new(dir.join("settings.toml")),
            tx,
        );
        app.start();
        (app, rx, dir)
    }

    fn ptt_settings(delay: f64) -> Settings {
        Settings {
            ptt_enabled: true,
            release_delay_secs: delay,
            ..Settings::default()
        }
    }

    #[test]
    fn test_start_mutes_when_ptt_enabled() {
        let backend = FakeBackend::new().with_input(10, false).with_default(10);
        let (app, _rx, dir) = app("start", &backend, ptt_settings(0.0));

        assert!(app.status().muted);
        assert!(app.status().ptt_enabled);
        assert_eq!(app.status().device.unwrap().uid, "uid-10");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_mode_toggle_is_persisted() {
        let backend = FakeBackend::new().with_input(10, false).with_default(10);
        let (mut app, _rx, dir) = app("persist", &backend, Settings::default());

        app.handle_hotkey(HotkeyEvent::PttModeTogglePressed);
        let saved = ConfigManager::new(dir.join("settings.toml")).load().unwrap();
        assert!(saved.ptt_enabled);
        assert!(backend.state().devices[0].muted);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_mode_toggle_keeps_pending_file_edits() {
        let backend = FakeBackend::new().with_input(10, false).with_default(10);
        let (mut app, _rx, dir) = app("pending-edits", &backend, Settings::default());

        // Written by the settings UI, not yet reloaded
        let manager = ConfigManager::new(dir.join("settings.toml"));
        let mut edited = Settings {
            release_delay_secs: 5.0,
            ..Settings::default()
        };
        edited.excluded_device_uids.insert("uid-77".to_string());
        manager.save(&edited).unwrap();

        app.handle_hotkey(HotkeyEvent::PttModeTogglePressed);

        let saved = manager.load().unwrap();
        assert!(saved.ptt_enabled);
        assert_eq!(saved.release_delay_secs, 5.0);
        assert!(saved.excluded_device_uids.contains("uid-77"));

        app.handle_command(Command::SetDeviceExcluded {
            uid: "uid-10".to_string(),
            excluded: true,
        });
        let saved = manager.load().unwrap();
        assert_eq!(saved.release_delay_secs, 5.0);
        assert!(saved.ptt_enabled);
        assert!(saved.excluded_device_uids.contains("uid-10"));
        assert!(saved.excluded_device_uids.contains("uid-77"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_disconnect_during_session() {
        let backend = FakeBackend::new().with_input(10, true).with_default(10);
        let (mut app, mut rx, dir) = app("disconnect", &backend, ptt_settings(2.0));

        app.handle_hotkey(HotkeyEvent::PttActionPressed);
        assert!(!app.status().muted);

        backend.remove_device(10);
        app.handle_notice(SystemNotice::DevicesChanged);
        app.handle_notice(SystemNotice::DefaultInputChanged);
        app.handle_notice(SystemNotice::DevicesChanged);

        let status = app.status();
        assert!(status.muted);
        assert!(!status.ptt_active);
        assert!(status.device.is_none());

        let mut disconnects = 0;
        while let Ok(event) = rx.try_recv() {
            if event
                == (StateEvent::Notice {
                    notice: Notice::DeviceDisconnected,
                })
            {
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_exclusion_command() {
        let backend = FakeBackend::new().with_input(10, false).with_default(10);
        let (mut app, _rx, dir) = app("exclude", &backend, Settings::default());

        let response = app.handle_command(Command::SetDeviceExcluded {
            uid: "uid-10".to_string(),
            excluded: true,
        });
        assert_eq!(response, Response::Ok);

        app.handle_command(Command::ToggleMute);
        assert!(backend.state().set_mute_calls.is_empty());
        assert!(!app.status().muted);

        let saved = ConfigManager::new(dir.join("settings.toml")).load().unwrap();
        assert!(saved.excluded_device_uids.contains("uid-10"));

        match app.handle_command(Command::ListDevices) {
            Response::Devices { devices, excluded } => {
                assert_eq!(devices.len(), 1);
                assert_eq!(excluded, vec!["uid-10".to_string()]);
            }
            other => panic!("unexpected response: {:?}", other),
        }
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_select_device_command() {
        let backend = FakeBackend::new()
            .with_input(10, false)
            .with_input(20, true)
            .with_default(10);
        let (mut app, _rx, dir) = app("select", &backend, Settings::default());

        assert_eq!(
            app.handle_command(Command::SelectDevice {
                uid: "uid-20".to_string()
            }),
            Response::Ok
        );
        app.handle_notice(SystemNotice::DefaultInputChanged);
        assert_eq!(app.status().device.unwrap().id, DeviceId(20));
        assert!(app.status().muted);

        let response = app.handle_command(Command::SelectDevice {
            uid: "nope".to_string(),
        });
        assert!(matches!(response, Response::Error { .. }));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_reload_settings() {
        let backend = FakeBackend::new().with_input(10, true).with_default(10);
        let (mut app, _rx, dir) = app("reload", &backend, Settings::default());

        let manager = ConfigManager::new(dir.join("settings.toml"));
        let mut edited = ptt_settings(1.0);
        edited.excluded_device_uids.insert("uid-99".to_string());
        manager.save(&edited).unwrap();

        assert_eq!(app.handle_command(Command::ReloadSettings), Response::Ok);
        assert!(app.status().ptt_enabled);
        assert!(app.monitor.excluded().contains("uid-99"));

        app.handle_hotkey(HotkeyEvent::PttActionPressed);
        app.handle_hotkey(HotkeyEvent::PttActionReleased);
        assert_eq!(app.machine.state(), PttState::Releasing { remaining: 1 });

        std::fs::write(dir.join("settings.toml"), "release_delay_secs = [").unwrap();
        assert!(matches!(
            app.handle_command(Command::ReloadSettings),
            Response::Error { .. }
        ));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_run_loop_drains_inputs() {
        let backend = FakeBackend::new().with_input(10, true).with_default(10);
        let (mut app, _rx, dir) = app("run", &backend, Settings::default());

        let (hotkey_tx, hotkeys) = mpsc::channel(8);
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let (timer_tx, timers) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::channel(8);

        hotkey_tx.send(HotkeyEvent::ToggleMutePressed).await.unwrap();
        backend.device_mut(10, |d| d.muted = true);
        notice_tx.send(SystemNotice::MuteChanged(DeviceId(10))).unwrap();
        let (reply, reply_rx) = tokio::sync::oneshot::channel();
        command_tx
            .send(CommandRequest {
                command: Command::ListDevices,
                reply,
            })
            .await
            .unwrap();
        drop((hotkey_tx, notice_tx, timer_tx, command_tx));

        app.run(Inputs {
            hotkeys,
            notices,
            timers,
            commands,
        })
        .await;

        assert!(matches!(reply_rx.await.unwrap(), Response::Devices { .. }));
        assert_eq!(backend.state().set_mute_calls, vec![(DeviceId(10), false)]);
        let _ = std::fs::remove_dir_all(dir);
    }
}
