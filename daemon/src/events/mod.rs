//! Events module for published daemon state
//!
//! Everything the presentation layer (menu bar icon, overlay, sounds,
//! notifications) consumes is emitted as a `StateEvent` on a broadcast
//! channel. Notices are fire-and-forget, one per occurrence.

use serde::{Deserialize, Serialize};

use crate::audio::InputDevice;

/// Events emitted by the audio monitor and the state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// Confirmed mute state of the current default input device
    MuteChanged { muted: bool },

    /// Push-to-talk session became active or inactive
    PttActiveChanged { active: bool },

    /// Release countdown, `None` when no release is pending
    CountdownChanged { remaining: Option<u32> },

    /// Push-to-talk mode was switched on or off
    PttModeChanged { enabled: bool },

    /// The overlay setting changed
    VisualFeedbackChanged { enabled: bool },

    /// The default input device binding changed
    DeviceChanged { device: Option<InputDevice> },

    /// The set of input devices was rebuilt
    DevicesChanged { devices: Vec<InputDevice> },

    /// The exclusion set was edited
    ExclusionsChanged { uids: Vec<String> },

    /// A one-shot user-facing notification
    Notice { notice: Notice },
}

/// User-facing one-shot notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    /// Push-to-talk was attempted without microphone permission
    PermissionDenied,
    /// Push-to-talk was attempted with no input device present
    NoInputDevice,
    /// The input device vanished during a push-to-talk session
    DeviceDisconnected,
}

impl Notice {
    pub fn title(&self) -> &'static str {
        match self {
            Notice::PermissionDenied => "Microphone access needed",
            Notice::NoInputDevice => "No microphone",
            Notice::DeviceDisconnected => "Microphone disconnected, push-to-talk disabled",
        }
    }

    pub fn body(&self) -> &'static str {
        match self {
            Notice::PermissionDenied => {
                "Allow microphone access in System Settings > Privacy & Security > Microphone."
            }
            Notice::NoInputDevice => "Connect a microphone to use push-to-talk.",
            Notice::DeviceDisconnected => {
                "The microphone is muted. Hold the push-to-talk shortcut again once a microphone is connected."
            }
        }
    }
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::MuteChanged { muted } => {
                write!(f, "{}", if *muted { "MUTED" } else { "LIVE" })
            }
            StateEvent::PttActiveChanged { active } => write!(f, "PTT_ACTIVE ({})", active),
            StateEvent::CountdownChanged { remaining: Some(n) } => write!(f, "COUNTDOWN ({}s)", n),
            StateEvent::CountdownChanged { remaining: None } => write!(f, "COUNTDOWN_CLEARED"),
            StateEvent::PttModeChanged { enabled } => write!(f, "PTT_MODE ({})", enabled),
            StateEvent::VisualFeedbackChanged { enabled } => write!(f, "OVERLAY ({})", enabled),
            StateEvent::DeviceChanged { device: Some(d) } => write!(f, "DEVICE ({})", d.name),
            StateEvent::DeviceChanged { device: None } => write!(f, "DEVICE (none)"),
            StateEvent::DevicesChanged { devices } => write!(f, "DEVICES ({})", devices.len()),
            StateEvent::ExclusionsChanged { uids } => write!(f, "EXCLUSIONS ({})", uids.len()),
            StateEvent::Notice { notice } => write!(f, "NOTICE ({:?})", notice),
        }
    }
}
