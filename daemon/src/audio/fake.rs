//! In-memory `AudioBackend` for tests
//!
//! Clones share state, so a test can keep a handle and change the
//! "operating system" underneath a monitor that owns another clone.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::backend::{AudioBackend, AudioResult};
use super::device::{AudioError, DeviceId};

#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub id: DeviceId,
    pub name: Option<String>,
    pub uid: Option<String>,
    pub input: bool,
    pub muted: bool,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub devices: Vec<FakeDevice>,
    pub default_input: Option<DeviceId>,
    pub fail_default_query: bool,
    pub fail_set_mute: bool,
    pub fail_mute_query: bool,
    /// Every successful or attempted `set_mute` call
    pub set_mute_calls: Vec<(DeviceId, bool)>,
    pub watched: BTreeSet<DeviceId>,
    /// Ordered log of watch/unwatch calls
    pub watch_log: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input device with a name and uid derived from `id`
    pub fn with_input(self, id: u32, muted: bool) -> Self {
        self.state().devices.push(FakeDevice {
            id: DeviceId(id),
            name: Some(format!("Mic {}", id)),
            uid: Some(format!("uid-{}", id)),
            input: true,
            muted,
        });
        self
    }

    pub fn with_default(self, id: u32) -> Self {
        self.state().default_input = Some(DeviceId(id));
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn device_mut<R>(&self, id: u32, f: impl FnOnce(&mut FakeDevice) -> R) -> R {
        let mut state = self.state();
        let device = state
            .devices
            .iter_mut()
            .find(|d| d.id == DeviceId(id))
            .unwrap();
        f(device)
    }

    pub fn remove_device(&self, id: u32) {
        let mut state = self.state();
        state.devices.retain(|d| d.id != DeviceId(id));
        if state.default_input == Some(DeviceId(id)) {
            state.default_input = None;
        }
    }

    fn with_device<R>(&self, id: DeviceId, f: impl FnOnce(&FakeDevice) -> R) -> AudioResult<R> {
        self.state()
            .devices
            .iter()
            .find(|d| d.id == id)
            .map(f)
            .ok_or(AudioError::Os {
                object: id.0,
                property: "device",
                status: -1,
            })
    }
}

impl AudioBackend for FakeBackend {
    fn device_ids(&self) -> AudioResult<Vec<DeviceId>> {
        Ok(self.state().devices.iter().map(|d| d.id).collect())
    }

    fn has_input_streams(&self, id: DeviceId) -> AudioResult<bool> {
        self.with_device(id, |d| d.input)
    }

    fn device_name(&self, id: DeviceId) -> AudioResult<String> {
        self.with_device(id, |d| d.name.clone())?
            .ok_or(AudioError::Missing {
                object: id.0,
                property: "name",
            })
    }

    fn device_uid(&self, id: DeviceId) -> AudioResult<String> {
        self.with_device(id, |d| d.uid.clone())?
            .ok_or(AudioError::Missing {
                object: id.0,
                property: "uid",
            })
    }

    fn default_input_device(&self) -> AudioResult<Option<DeviceId>> {
        let state = self.state();
        if state.fail_default_query {
            return Err(AudioError::Os {
                object: 1,
                property: "default input",
                status: -1,
            });
        }
        Ok(state.default_input)
    }

    fn set_default_input_device(&self, id: DeviceId) -> AudioResult<()> {
        self.with_device(id, |_| ())?;
        self.state().default_input = Some(id);
        Ok(())
    }

    fn mute(&self, id: DeviceId) -> AudioResult<bool> {
        if self.state().fail_mute_query {
            return Err(AudioError::Os {
                object: id.0,
                property: "mute",
                status: -1,
            });
        }
        self.with_device(id, |d| d.muted)
    }

    fn set_mute(&self, id: DeviceId, muted: bool) -> AudioResult<()> {
        let mut state = self.state();
        state.set_mute_calls.push((id, muted));
        if state.fail_set_mute {
            return Err(AudioError::Os {
                object: id.0,
                property: "mute",
                status: -1,
            });
        }
        match state.devices.iter_mut().find(|d| d.id == id) {
            Some(device) => {
                device.muted = muted;
                Ok(())
            }
            None => Err(AudioError::Os {
                object: id.0,
                property: "mute",
                status: -1,
            }),
        }
    }

    fn watch_mute(&mut self, id: DeviceId) -> AudioResult<()> {
        let mut state = self.state();
        state.watched.insert(id);
        state.watch_log.push(format!("watch {}", id.0));
        Ok(())
    }

    fn unwatch_mute(&mut self, id: DeviceId) -> AudioResult<()> {
        let mut state = self.state();
        state.watched.remove(&id);
        state.watch_log.push(format!("unwatch {}", id.0));
        Ok(())
    }
}
