//! Default input device reconciliation and mute control
//!
//! All OS notices are funnelled through `handle_notice` in arrival order,
//! which makes it the single reconciliation point: the mute listener is
//! moved from the old device to the new one and the mute flag re-read
//! before the next notice is looked at.
//!
//! The published mute flag only ever reflects a value read back from the
//! OS (or a write the OS accepted). Query failures keep the last known
//! good state, except after the default device disappears, where the
//! flag falls back to muted.

use std::collections::BTreeSet;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, SystemNotice};
use super::device::{AudioError, DeviceId, InputDevice};
use crate::events::StateEvent;
use crate::state::Microphone;

/// Reconciliation outcomes the push-to-talk layer must act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSignal {
    /// The bound default input went away and nothing replaced it
    DeviceDisconnected,
}

pub struct AudioMonitor<B: AudioBackend> {
    backend: B,
    excluded: BTreeSet<String>,
    devices: Vec<InputDevice>,
    /// Device currently holding the mute listener
    bound: Option<DeviceId>,
    /// Last published mute flag, `None` before the first read
    muted: Option<bool>,
    event_tx: broadcast::Sender<StateEvent>,
}

impl<B: AudioBackend> AudioMonitor<B> {
    pub fn new(
        backend: B,
        excluded: BTreeSet<String>,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Self {
        Self {
            backend,
            excluded,
            devices: Vec::new(),
            bound: None,
            muted: None,
            event_tx,
        }
    }

    /// Initial sync: build the device list and bind the current default
    pub fn start(&mut self) {
        self.refresh_device_list();
        self.reconcile_default_device();
        if self.bound.is_none() {
            info!("no default input device at startup");
            self.publish_mute(true);
        }
    }

    pub fn devices(&self) -> &[InputDevice] {
        &self.devices
    }

    /// Device currently bound as the default input
    pub fn current_device(&self) -> Option<InputDevice> {
        let id = self.bound?;
        Some(self.describe(id))
    }

    /// Last confirmed mute state; unknown is reported as muted
    pub fn is_muted(&self) -> bool {
        self.muted.unwrap_or(true)
    }

    pub fn excluded(&self) -> &BTreeSet<String> {
        &self.excluded
    }

    /// Add or remove a device uid from the exclusion set.
    ///
    /// Returns whether the set changed.
    pub fn set_excluded(&mut self, uid: &str, excluded: bool) -> bool {
        let changed = if excluded {
            self.excluded.insert(uid.to_string())
        } else {
            self.excluded.remove(uid)
        };
        if changed {
            info!(uid, excluded, "device exclusion updated");
            let _ = self.event_tx.send(StateEvent::ExclusionsChanged {
                uids: self.excluded.iter().cloned().collect(),
            });
        }
        changed
    }

    /// Rebuild the input device list from scratch
    pub fn refresh_device_list(&mut self) {
        let ids = match self.backend.device_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(?e, "device enumeration failed, keeping previous list");
                return;
            }
        };

        let mut devices = Vec::with_capacity(ids.len());
        for id in ids {
            match self.backend.has_input_streams(id) {
                Ok(true) => devices.push(self.describe(id)),
                Ok(false) => {}
                Err(e) => debug!(device = %id, ?e, "stream query failed, skipping"),
            }
        }

        debug!(count = devices.len(), "input devices refreshed");
        self.devices = devices;
        let _ = self.event_tx.send(StateEvent::DevicesChanged {
            devices: self.devices.clone(),
        });
    }

    /// The OS's current default input, `None` when there is none or the
    /// query failed
    pub fn default_input_device(&self) -> Option<DeviceId> {
        match self.backend.default_input_device() {
            Ok(id) => id,
            Err(e) => {
                warn!(?e, "default input query failed");
                None
            }
        }
    }

    pub fn is_input_device_available(&self) -> bool {
        self.default_input_device().is_some()
    }

    /// Mute or unmute the current default input.
    ///
    /// No-op when no device resolves or the device is excluded. The
    /// published flag changes only after the OS accepted the write.
    pub fn set_mute(&mut self, muted: bool) {
        // Re-derive at the point of action; a reconciliation may be queued
        let Some(id) = self.default_input_device() else {
            debug!(muted, "no default input device, mute request ignored");
            return;
        };

        let uid = self.uid_of(id);
        if self.excluded.contains(&uid) {
            info!(device = %id, %uid, muted, "device excluded, mute suppressed");
            return;
        }

        if let Err(e) = self.backend.set_mute(id, muted) {
            warn!(device = %id, muted, ?e, "mute write rejected");
            return;
        }

        let confirmed = match self.backend.mute(id) {
            Ok(actual) => actual,
            Err(e) => {
                debug!(device = %id, ?e, "mute read-back failed, trusting accepted write");
                muted
            }
        };
        debug!(device = %id, requested = muted, confirmed, "mute written");
        self.publish_mute(confirmed);
    }

    /// Make `uid` the system default input; the OS notice that follows
    /// drives reconciliation
    pub fn select_input_device(&mut self, uid: &str) -> Result<(), AudioError> {
        let device = self
            .devices
            .iter()
            .find(|d| d.uid == uid)
            .ok_or_else(|| AudioError::DeviceNotFound {
                uid: uid.to_string(),
            })?;
        info!(device = %device.id, name = %device.name, "selecting input device");
        self.backend.set_default_input_device(device.id)
    }

    /// Apply one OS notice
    pub fn handle_notice(&mut self, notice: SystemNotice) -> Option<MonitorSignal> {
        debug!(?notice, "system notice");
        match notice {
            SystemNotice::DefaultInputChanged => self.reconcile_default_device(),
            SystemNotice::DevicesChanged => {
                self.refresh_device_list();
                // A removed default device may only show up here
                self.reconcile_default_device()
            }
            SystemNotice::MuteChanged(id) => {
                if Some(id) == self.bound {
                    self.read_mute(id);
                } else {
                    debug!(device = %id, "mute notice for unbound device ignored");
                }
                None
            }
        }
    }

    /// Move the mute listener to whatever is now the default input
    fn reconcile_default_device(&mut self) -> Option<MonitorSignal> {
        let next = match self.backend.default_input_device() {
            Ok(next) => next,
            Err(e) => {
                warn!(?e, "default input query failed, keeping current binding");
                return None;
            }
        };

        if next == self.bound {
            return None;
        }

        if let Some(old) = self.bound.take() {
            if let Err(e) = self.backend.unwatch_mute(old) {
                debug!(device = %old, ?e, "failed to detach mute listener");
            }
        }
        self.bound = next;

        let device = next.map(|id| self.describe(id));
        info!(
            device = device.as_ref().map(|d| d.name.as_str()).unwrap_or("none"),
            "default input device changed"
        );
        let _ = self.event_tx.send(StateEvent::DeviceChanged {
            device: device.clone(),
        });

        match next {
            Some(id) => {
                if let Err(e) = self.backend.watch_mute(id) {
                    warn!(device = %id, ?e, "failed to attach mute listener");
                }
                self.read_mute(id);
                None
            }
            None => {
                self.publish_mute(true);
                Some(MonitorSignal::DeviceDisconnected)
            }
        }
    }

    fn read_mute(&mut self, id: DeviceId) {
        match self.backend.mute(id) {
            Ok(muted) => self.publish_mute(muted),
            Err(e) => warn!(device = %id, ?e, "mute query failed, keeping last state"),
        }
    }

    fn publish_mute(&mut self, muted: bool) {
        if self.muted == Some(muted) {
            return;
        }
        self.muted = Some(muted);
        info!(muted, "mute state");
        let _ = self.event_tx.send(StateEvent::MuteChanged { muted });
    }

    fn uid_of(&self, id: DeviceId) -> String {
        match self.backend.device_uid(id) {
            Ok(uid) => uid,
            Err(_) => self
                .devices
                .iter()
                .find(|d| d.id == id)
                .map(|d| d.uid.clone())
                .unwrap_or_else(|| InputDevice::unknown_label(id)),
        }
    }

    fn describe(&self, id: DeviceId) -> InputDevice {
        let name = self.backend.device_name(id).unwrap_or_else(|e| {
            debug!(device = %id, ?e, "name query failed");
            InputDevice::unknown_label(id)
        });
        InputDevice {
            id,
            name,
            uid: self.uid_of(id),
        }
    }
}

impl<B: AudioBackend> Microphone for AudioMonitor<B> {
    fn set_mute(&mut self, muted: bool) {
        AudioMonitor::set_mute(self, muted)
    }

    fn is_muted(&self) -> bool {
        AudioMonitor::is_muted(self)
    }

    fn is_input_device_available(&self) -> bool {
        AudioMonitor::is_input_device_available(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fake::FakeBackend;

    fn monitor(backend: &FakeBackend) -> (AudioMonitor<FakeBackend>, broadcast::Receiver<StateEvent>) {
        let (tx, rx) = broadcast::channel(64);
        let mut monitor = AudioMonitor::new(backend.clone(), BTreeSet::new(), tx);
        monitor.start();
        (monitor, rx)
    }

    fn drain(rx: &mut broadcast::Receiver<StateEvent>) -> Vec<StateEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_start_binds_default_device() {
        let backend = FakeBackend::new().with_input(10, true).with_default(10);
        let (monitor, mut rx) = monitor(&backend);

        assert!(monitor.is_muted());
        assert_eq!(monitor.current_device().unwrap().uid, "uid-10");
        assert!(backend.state().watched.contains(&DeviceId(10)));
        assert!(drain(&mut rx).contains(&StateEvent::MuteChanged { muted: true }));
    }

    #[test]
    fn test_device_list_filters_outputs_and_keeps_nameless() {
        let backend = FakeBackend::new().with_input(1, false).with_input(2, false);
        backend.device_mut(1, |d| d.input = false);
        backend.device_mut(2, |d| d.name = None);
        let (monitor, _rx) = monitor(&backend);

        assert_eq!(monitor.devices().len(), 1);
        let device = &monitor.devices()[0];
        assert_eq!(device.name, "unknown-2");
        assert_eq!(device.uid, "uid-2");
    }

    #[test]
    fn test_no_device_is_not_an_error() {
        let backend = FakeBackend::new();
        let (mut monitor, _rx) = monitor(&backend);

        assert!(!monitor.is_input_device_available());
        assert!(monitor.is_muted());
        monitor.set_mute(false);
        assert!(backend.state().set_mute_calls.is_empty());
    }

    #[test]
    fn test_set_mute_publishes_only_confirmed_state() {
        let backend = FakeBackend::new().with_input(10, true).with_default(10);
        let (mut monitor, mut rx) = monitor(&backend);
        drain(&mut rx);

        monitor.set_mute(false);
        assert!(!monitor.is_muted());
        assert_eq!(drain(&mut rx), vec![StateEvent::MuteChanged { muted: false }]);

        backend.state().fail_set_mute = true;
        monitor.set_mute(true);
        assert!(!monitor.is_muted(), "rejected write must not change published state");
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_excluded_device_never_muted() {
        let backend = FakeBackend::new().with_input(10, false).with_default(10);
        let (mut monitor, mut rx) = monitor(&backend);
        assert!(monitor.set_excluded("uid-10", true));
        drain(&mut rx);

        monitor.set_mute(true);
        assert!(backend.state().set_mute_calls.is_empty());
        assert!(!monitor.is_muted());
        assert!(drain(&mut rx).is_empty());

        assert!(!monitor.set_excluded("uid-10", true));
        assert!(monitor.set_excluded("uid-10", false));
        monitor.set_mute(true);
        assert_eq!(backend.state().set_mute_calls, vec![(DeviceId(10), true)]);
    }

    #[test]
    fn test_default_change_moves_listener_then_reads() {
        let backend = FakeBackend::new()
            .with_input(10, true)
            .with_input(20, false)
            .with_default(10);
        let (mut monitor, mut rx) = monitor(&backend);
        drain(&mut rx);

        backend.state().default_input = Some(DeviceId(20));
        assert_eq!(monitor.handle_notice(SystemNotice::DefaultInputChanged), None);

        let state = backend.state();
        assert_eq!(state.watch_log, vec!["watch 10", "unwatch 10", "watch 20"]);
        assert_eq!(state.watched.len(), 1);
        drop(state);

        assert!(!monitor.is_muted());
        let events = drain(&mut rx);
        assert!(events.contains(&StateEvent::MuteChanged { muted: false }));
    }

    #[test]
    fn test_redundant_default_notices_are_ignored() {
        let backend = FakeBackend::new().with_input(10, false).with_default(10);
        let (mut monitor, _rx) = monitor(&backend);

        monitor.handle_notice(SystemNotice::DefaultInputChanged);
        monitor.handle_notice(SystemNotice::DefaultInputChanged);
        assert_eq!(backend.state().watch_log, vec!["watch 10"]);
    }

    #[test]
    fn test_disconnect_signalled_once_and_fails_safe() {
        let backend = FakeBackend::new().with_input(10, false).with_default(10);
        let (mut monitor, _rx) = monitor(&backend);
        assert!(!monitor.is_muted());

        backend.remove_device(10);
        assert_eq!(
            monitor.handle_notice(SystemNotice::DevicesChanged),
            Some(MonitorSignal::DeviceDisconnected)
        );
        assert!(monitor.is_muted());
        assert!(monitor.current_device().is_none());
        assert!(monitor.devices().is_empty());

        // the same disconnect reported again
        assert_eq!(monitor.handle_notice(SystemNotice::DefaultInputChanged), None);
        assert_eq!(monitor.handle_notice(SystemNotice::DevicesChanged), None);
    }

    #[test]
    fn test_failed_default_query_keeps_binding() {
        let backend = FakeBackend::new().with_input(10, false).with_default(10);
        let (mut monitor, _rx) = monitor(&backend);

        backend.state().fail_default_query = true;
        assert_eq!(monitor.handle_notice(SystemNotice::DefaultInputChanged), None);
        assert_eq!(monitor.current_device().unwrap().id, DeviceId(10));
        assert!(!monitor.is_muted());
    }

    #[test]
    fn test_external_mute_change_on_bound_device_only() {
        let backend = FakeBackend::new()
            .with_input(10, false)
            .with_input(20, false)
            .with_default(10);
        let (mut monitor, _rx) = monitor(&backend);

        backend.device_mut(20, |d| d.muted = true);
        monitor.handle_notice(SystemNotice::MuteChanged(DeviceId(20)));
        assert!(!monitor.is_muted());

        backend.device_mut(10, |d| d.muted = true);
        monitor.handle_notice(SystemNotice::MuteChanged(DeviceId(10)));
        assert!(monitor.is_muted());
    }

    #[test]
    fn test_failed_mute_query_keeps_last_state() {
        let backend = FakeBackend::new().with_input(10, false).with_default(10);
        let (mut monitor, _rx) = monitor(&backend);

        backend.device_mut(10, |d| d.muted = true);
        backend.state().fail_mute_query = true;
        monitor.handle_notice(SystemNotice::MuteChanged(DeviceId(10)));
        assert!(!monitor.is_muted());
    }

    #[test]
    fn test_select_input_device() {
        let backend = FakeBackend::new()
            .with_input(10, false)
            .with_input(20, false)
            .with_default(10);
        let (mut monitor, _rx) = monitor(&backend);

        monitor.select_input_device("uid-20").unwrap();
        assert_eq!(backend.state().default_input, Some(DeviceId(20)));

        let err = monitor.select_input_device("missing").unwrap_err();
        assert!(matches!(err, AudioError::DeviceNotFound { .. }));
    }
}
