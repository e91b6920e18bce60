//! Audio module: default input device tracking and mute control
//!
//! `AudioMonitor` owns the reconciled view of "which device is the default
//! input, is it muted, which inputs exist". The OS is reached through the
//! `AudioBackend` trait; `CoreAudioBackend` is the macOS implementation.

mod backend;
#[cfg(target_os = "macos")]
mod coreaudio;
mod device;
#[cfg(test)]
pub(crate) mod fake;
mod monitor;

pub use backend::{AudioBackend, SystemNotice};
#[cfg(target_os = "macos")]
pub use coreaudio::CoreAudioBackend;
#[cfg(test)]
pub use device::DeviceId;
pub use device::InputDevice;
pub use monitor::{AudioMonitor, MonitorSignal};
