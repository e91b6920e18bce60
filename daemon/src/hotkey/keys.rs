//! Modifier key definitions and shortcut descriptors
//!
//! Modifier bits follow the macOS `CGEventFlags` layout so a persisted
//! `{keyCode, modifiers}` descriptor can be compared directly against
//! what the event tap reports.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Modifier key flag masks from macOS CGEventFlags
pub mod flags {
    /// Shift key modifier flag
    pub const SHIFT: u64 = 0x0002_0000;
    /// Control key modifier flag
    pub const CONTROL: u64 = 0x0004_0000;
    /// Option/Alt key modifier flag
    pub const OPTION: u64 = 0x0008_0000;
    /// Command key modifier flag
    pub const COMMAND: u64 = 0x0010_0000;
    /// Fn/Globe key modifier flag
    pub const FUNCTION: u64 = 0x0080_0000;
}

/// Tracks which modifier keys are currently pressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub struct ModifierState {
    /// Control key is held
    pub control: bool,
    /// Option/Alt key is held
    pub option: bool,
    /// Command key is held
    pub command: bool,
    /// Shift key is held
    pub shift: bool,
    /// Fn key is held
    pub function: bool,
}

impl ModifierState {
    /// Decode from a CGEventFlags-compatible bit mask. Unrelated bits
    /// (caps lock, numeric pad, device-dependent flags) are ignored.
    pub fn from_bits(bits: u64) -> Self {
        Self {
            control: bits & flags::CONTROL != 0,
            option: bits & flags::OPTION != 0,
            command: bits & flags::COMMAND != 0,
            shift: bits & flags::SHIFT != 0,
            function: bits & flags::FUNCTION != 0,
        }
    }

    pub fn bits(&self) -> u64 {
        let mut bits = 0;
        if self.control {
            bits |= flags::CONTROL;
        }
        if self.option {
            bits |= flags::OPTION;
        }
        if self.command {
            bits |= flags::COMMAND;
        }
        if self.shift {
            bits |= flags::SHIFT;
        }
        if self.function {
            bits |= flags::FUNCTION;
        }
        bits
    }

    /// Create a new ModifierState from CGEventFlags
    #[cfg(target_os = "macos")]
    pub fn from_flags(flags: core_graphics::event::CGEventFlags) -> Self {
        Self::from_bits(flags.bits())
    }

    /// Check if all modifiers are released
    pub fn is_empty(&self) -> bool {
        self.bits() == 0
    }
}

impl From<u64> for ModifierState {
    fn from(bits: u64) -> Self {
        Self::from_bits(bits)
    }
}

impl From<ModifierState> for u64 {
    fn from(state: ModifierState) -> Self {
        state.bits()
    }
}

impl fmt::Display for ModifierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.function {
            write!(f, "fn")?;
        }
        if self.control {
            write!(f, "⌃")?;
        }
        if self.option {
            write!(f, "⌥")?;
        }
        if self.shift {
            write!(f, "⇧")?;
        }
        if self.command {
            write!(f, "⌘")?;
        }
        Ok(())
    }
}

/// A global shortcut: a virtual key code plus an exact modifier set, or a
/// modifier-only chord when `key_code` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shortcut {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_code: Option<u16>,
    pub modifiers: ModifierState,
}

impl Shortcut {
    pub fn key(key_code: u16, modifiers: ModifierState) -> Self {
        Self {
            key_code: Some(key_code),
            modifiers,
        }
    }

    pub fn modifiers_only(modifiers: ModifierState) -> Self {
        Self {
            key_code: None,
            modifiers,
        }
    }

    pub fn is_modifier_only(&self) -> bool {
        self.key_code.is_none()
    }
}

impl fmt::Display for Shortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key_code {
            Some(code) => write!(f, "{}key({})", self.modifiers, code),
            None => write!(f, "{}", self.modifiers),
        }
    }
}
