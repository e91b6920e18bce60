//! The seam between the monitor and the platform audio API

use super::device::{AudioError, DeviceId};

pub type AudioResult<T> = Result<T, AudioError>;

/// Raw change notifications delivered by the OS, in arrival order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemNotice {
    /// The system default input device changed
    DefaultInputChanged,
    /// A device was added or removed
    DevicesChanged,
    /// The mute property of a watched device changed
    MuteChanged(DeviceId),
}

/// Synchronous property access to the platform audio system.
///
/// Calls are cheap and never block on I/O, but must only be issued from
/// one thread at a time; the monitor is the sole caller.
pub trait AudioBackend {
    /// Every audio object the system reports, input-capable or not
    fn device_ids(&self) -> AudioResult<Vec<DeviceId>>;

    fn has_input_streams(&self, id: DeviceId) -> AudioResult<bool>;

    fn device_name(&self, id: DeviceId) -> AudioResult<String>;

    fn device_uid(&self, id: DeviceId) -> AudioResult<String>;

    /// Current default input, `None` when the system has no input device
    fn default_input_device(&self) -> AudioResult<Option<DeviceId>>;

    fn set_default_input_device(&self, id: DeviceId) -> AudioResult<()>;

    fn mute(&self, id: DeviceId) -> AudioResult<bool>;

    fn set_mute(&self, id: DeviceId, muted: bool) -> AudioResult<()>;

    /// Start delivering `SystemNotice::MuteChanged` for this device
    fn watch_mute(&mut self, id: DeviceId) -> AudioResult<()>;

    fn unwatch_mute(&mut self, id: DeviceId) -> AudioResult<()>;
}
