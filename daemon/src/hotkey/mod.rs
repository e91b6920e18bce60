//! Hotkey module for global keyboard event listening
//!
//! Uses macOS CGEventTap to observe key and modifier events and turns
//! configured chords into the four abstract events the state machine
//! consumes.

mod chord;
mod keys;
#[cfg(target_os = "macos")]
mod listener;

pub use chord::HotkeyEvent;
pub use keys::{ModifierState, Shortcut};
#[cfg(target_os = "macos")]
pub use listener::HotkeyListener;
