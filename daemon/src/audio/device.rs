//! Audio device data models

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque platform device identifier (a CoreAudio `AudioObjectID`).
///
/// Not stable across reboot or reconnect; use `InputDevice::uid` for
/// anything persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An input-capable audio device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDevice {
    pub id: DeviceId,

    /// Human-readable name, or `unknown-<id>` when the OS would not say
    pub name: String,

    /// Persistent unique identifier used for exclusion matching
    pub uid: String,
}

impl InputDevice {
    /// Placeholder label for a device whose property query failed
    pub fn unknown_label(id: DeviceId) -> String {
        format!("unknown-{}", id.0)
    }
}

/// Audio backend error types
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("{property} query on audio object {object} failed with status {status}")]
    Os {
        object: u32,
        property: &'static str,
        status: i32,
    },

    #[error("audio object {object} returned no value for {property}")]
    Missing { object: u32, property: &'static str },

    #[error("no input device with uid {uid}")]
    DeviceNotFound { uid: String },
}
