//! Feedback collaborators: sounds, notifications and the permission probe
//!
//! The state machine only sees the `Feedback` and `PermissionCheck`
//! traits; the macOS implementations live behind them.

mod notify;
#[cfg(target_os = "macos")]
mod permission;
#[cfg(target_os = "macos")]
mod sound;

use std::path::Path;

#[cfg(target_os = "macos")]
pub use notify::present;
#[cfg(target_os = "macos")]
pub use permission::AvPermission;
#[cfg(target_os = "macos")]
pub use sound::SoundPlayer;

/// Fire-and-forget sound playback
pub trait Feedback: Send {
    fn play(&self, sound: &Path);
}

/// Microphone privacy permission probe
///
/// "Granted" includes the not-yet-asked state: the OS shows its own prompt
/// on first capture, so only an explicit denial blocks push-to-talk.
pub trait PermissionCheck: Send {
    fn microphone_granted(&self) -> bool;
}

/// `AVAuthorizationStatus` values
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    NotDetermined,
    Restricted,
    Denied,
    Authorized,
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
impl Authorization {
    pub fn from_raw(status: isize) -> Self {
        match status {
            0 => Authorization::NotDetermined,
            1 => Authorization::Restricted,
            3 => Authorization::Authorized,
            // 2, and anything newer we don't know, is treated as a refusal
            _ => Authorization::Denied,
        }
    }

    pub fn allows_capture(self) -> bool {
        matches!(
            self,
            Authorization::Authorized | Authorization::NotDetermined
        )
    }
}

/// Feedback sink used when no audio output is available
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
#[derive(Debug, Default)]
pub struct Silent;

impl Feedback for Silent {
    fn play(&self, _sound: &Path) {}
}
