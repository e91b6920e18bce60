//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::audio::InputDevice;
use crate::events::StateEvent;

/// Requests from UI to daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Subscribe to state change notifications
    Subscribe,

    /// Same as pressing the standard mute toggle
    ToggleMute,

    /// Input devices and the exclusion set
    ListDevices,

    /// Make a device the system default input
    SelectDevice { uid: String },

    /// Add or remove a device from the exclusion set
    SetDeviceExcluded { uid: String, excluded: bool },

    /// Re-read the settings file and apply it
    ReloadSettings,
}

impl Request {
    /// The main-loop command for requests the server cannot answer itself
    pub fn into_command(self) -> Option<Command> {
        match self {
            Request::Ping | Request::GetStatus | Request::Subscribe => None,
            Request::ToggleMute => Some(Command::ToggleMute),
            Request::ListDevices => Some(Command::ListDevices),
            Request::SelectDevice { uid } => Some(Command::SelectDevice { uid }),
            Request::SetDeviceExcluded { uid, excluded } => {
                Some(Command::SetDeviceExcluded { uid, excluded })
            }
            Request::ReloadSettings => Some(Command::ReloadSettings),
        }
    }
}

/// Responses from daemon to UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Known input devices
    Devices {
        devices: Vec<InputDevice>,
        excluded: Vec<String>,
    },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Command accepted
    Ok,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// State event occurred
    Event { event: StateEvent },
}

/// Work the server hands to the main loop, which owns the monitor and
/// the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ToggleMute,
    ListDevices,
    SelectDevice { uid: String },
    SetDeviceExcluded { uid: String, excluded: bool },
    ReloadSettings,
}

/// A command plus the channel its response goes back on
#[derive(Debug)]
pub struct CommandRequest {
    pub command: Command,
    pub reply: oneshot::Sender<Response>,
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Confirmed mute state of the default input
    pub muted: bool,

    pub ptt_enabled: bool,

    /// A push-to-talk session is active or releasing
    pub ptt_active: bool,

    /// Seconds left before a pending release mutes
    pub countdown: Option<u32>,

    /// Current default input device
    pub device: Option<InputDevice>,

    /// Whether the overlay should be shown
    pub visual_feedback: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            muted: true,
            ptt_enabled: false,
            ptt_active: false,
            countdown: None,
            device: None,
            visual_feedback: true,
            uptime_secs: 0,
        }
    }
}

impl DaemonStatus {
    /// Fold a published event into the snapshot
    pub fn apply(&mut self, event: &StateEvent) {
        match event {
            StateEvent::MuteChanged { muted } => self.muted = *muted,
            StateEvent::PttActiveChanged { active } => self.ptt_active = *active,
            StateEvent::CountdownChanged { remaining } => self.countdown = *remaining,
            StateEvent::PttModeChanged { enabled } => self.ptt_enabled = *enabled,
            StateEvent::DeviceChanged { device } => self.device = device.clone(),
            StateEvent::VisualFeedbackChanged { enabled } => self.visual_feedback = *enabled,
            StateEvent::DevicesChanged { .. }
            | StateEvent::ExclusionsChanged { .. }
            | StateEvent::Notice { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::DeviceId;

    #[test]
    fn test_request_serialization() {
        let req = Request::SetDeviceExcluded {
            uid: "BuiltInMic".to_string(),
            excluded: true,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"type":"set_device_excluded","uid":"BuiltInMic","excluded":true}"#
        );

        let req: Request = serde_json::from_str(r#"{"type":"toggle_mute"}"#).unwrap();
        assert_eq!(req.into_command(), Some(Command::ToggleMute));
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.starts_with(r#"{"type":"status""#));
        assert!(json.contains(r#""muted":true"#));
    }

    #[test]
    fn test_notification_wraps_event() {
        let push = Notification::Event {
            event: StateEvent::MuteChanged { muted: false },
        };
        let json = serde_json::to_string(&push).unwrap();
        assert_eq!(
            json,
            r#"{"type":"event","event":{"type":"mute_changed","muted":false}}"#
        );
    }

    #[test]
    fn test_status_apply() {
        let mut status = DaemonStatus::default();
        let device = InputDevice {
            id: DeviceId(42),
            name: "USB Mic".to_string(),
            uid: "usb-1".to_string(),
        };

        status.apply(&StateEvent::MuteChanged { muted: false });
        status.apply(&StateEvent::PttModeChanged { enabled: true });
        status.apply(&StateEvent::PttActiveChanged { active: true });
        status.apply(&StateEvent::CountdownChanged { remaining: Some(2) });
        status.apply(&StateEvent::DeviceChanged {
            device: Some(device.clone()),
        });

        assert!(!status.muted);
        assert!(status.ptt_enabled);
        assert!(status.ptt_active);
        assert_eq!(status.countdown, Some(2));
        assert_eq!(status.device, Some(device));

        status.apply(&StateEvent::CountdownChanged { remaining: None });
        assert_eq!(status.countdown, None);
    }
}
