//! Chord tracking: raw keyboard input to abstract hotkey events
//!
//! Handles both discrete-key chords (press/release are real key down/up)
//! and modifier-only chords (press when the exact modifier set becomes
//! held, release when it no longer is). Key auto-repeat and duplicate
//! key-downs are filtered here so the state machine only sees edges.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::keys::{ModifierState, Shortcut};
use crate::config::Shortcuts;

/// Events sent from the hotkey listener to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    /// Standard mute toggle chord pressed
    ToggleMutePressed,
    /// Push-to-talk mode toggle chord pressed
    PttModeTogglePressed,
    /// Push-to-talk action chord went down
    PttActionPressed,
    /// Push-to-talk action chord is no longer held
    PttActionReleased,
    /// Event tap was disabled by macOS (re-enabled by the listener)
    TapDisabled,
}

/// Keyboard input as delivered by the event tap
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKey {
    FlagsChanged(ModifierState),
    KeyDown {
        key_code: u16,
        modifiers: ModifierState,
        repeat: bool,
    },
    KeyUp {
        key_code: u16,
    },
}

/// Bindable actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ToggleMute,
    PttModeToggle,
    PttAction,
}

impl Action {
    fn pressed(self) -> HotkeyEvent {
        match self {
            Action::ToggleMute => HotkeyEvent::ToggleMutePressed,
            Action::PttModeToggle => HotkeyEvent::PttModeTogglePressed,
            Action::PttAction => HotkeyEvent::PttActionPressed,
        }
    }

    fn released(self) -> Option<HotkeyEvent> {
        match self {
            Action::PttAction => Some(HotkeyEvent::PttActionReleased),
            Action::ToggleMute | Action::PttModeToggle => None,
        }
    }
}

/// Converts a raw key stream into press/release edges for bound actions
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
#[derive(Debug)]
pub struct ChordTracker {
    bindings: Vec<(Action, Shortcut)>,
    held: HashSet<Action>,
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
impl ChordTracker {
    /// Build a tracker from configured shortcuts.
    ///
    /// When two actions share a shortcut the later one is dropped, so a
    /// single chord never fires two actions.
    pub fn new(shortcuts: &Shortcuts) -> Self {
        let candidates = [
            (Action::ToggleMute, shortcuts.toggle_mute),
            (Action::PttModeToggle, shortcuts.ptt_toggle),
            (Action::PttAction, shortcuts.ptt_action),
        ];

        let mut bindings: Vec<(Action, Shortcut)> = Vec::new();
        for (action, shortcut) in candidates {
            let Some(shortcut) = shortcut else {
                continue;
            };
            if shortcut.is_modifier_only() && shortcut.modifiers.is_empty() {
                warn!(?action, "ignoring empty modifier-only shortcut");
                continue;
            }
            if let Some((existing, _)) = bindings.iter().find(|(_, s)| *s == shortcut) {
                warn!(
                    ?action,
                    conflicts_with = ?existing,
                    %shortcut,
                    "shortcut already bound, ignoring"
                );
                continue;
            }
            bindings.push((action, shortcut));
        }

        Self {
            bindings,
            held: HashSet::new(),
        }
    }

    /// Number of active bindings
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Feed one raw key event, returning the resulting hotkey edges
    pub fn process(&mut self, raw: RawKey) -> Vec<HotkeyEvent> {
        let mut out = Vec::new();

        match raw {
            RawKey::FlagsChanged(modifiers) => {
                for &(action, shortcut) in &self.bindings {
                    if !shortcut.is_modifier_only() {
                        continue;
                    }
                    let now_held = modifiers == shortcut.modifiers;
                    let was_held = self.held.contains(&action);
                    if now_held && !was_held {
                        self.held.insert(action);
                        out.push(action.pressed());
                    } else if !now_held && was_held {
                        self.held.remove(&action);
                        out.extend(action.released());
                    }
                }
            }
            RawKey::KeyDown {
                key_code,
                modifiers,
                repeat,
            } => {
                if repeat {
                    return out;
                }
                for &(action, shortcut) in &self.bindings {
                    if shortcut.key_code == Some(key_code)
                        && shortcut.modifiers == modifiers
                        && self.held.insert(action)
                    {
                        out.push(action.pressed());
                    }
                }
            }
            RawKey::KeyUp { key_code } => {
                for &(action, shortcut) in &self.bindings {
                    if shortcut.key_code == Some(key_code) && self.held.remove(&action) {
                        out.extend(action.released());
                    }
                }
            }
        }

        if !out.is_empty() {
            debug!(?raw, events = ?out, "chord edges");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control_option() -> ModifierState {
        ModifierState {
            control: true,
            option: true,
            ..ModifierState::default()
        }
    }

    fn command_shift() -> ModifierState {
        ModifierState {
            command: true,
            shift: true,
            ..ModifierState::default()
        }
    }

    fn tracker() -> ChordTracker {
        ChordTracker::new(&Shortcuts {
            toggle_mute: Some(Shortcut::key(46, command_shift())),
            ptt_toggle: Some(Shortcut::key(35, command_shift())),
            ptt_action: Some(Shortcut::modifiers_only(control_option())),
        })
    }

    #[test]
    fn test_modifier_only_press_and_release() {
        let mut t = tracker();
        let control = ModifierState {
            control: true,
            ..ModifierState::default()
        };

        assert!(t.process(RawKey::FlagsChanged(control)).is_empty());
        assert_eq!(
            t.process(RawKey::FlagsChanged(control_option())),
            vec![HotkeyEvent::PttActionPressed]
        );
        // redundant flags report while still held
        assert!(t.process(RawKey::FlagsChanged(control_option())).is_empty());
        assert_eq!(
            t.process(RawKey::FlagsChanged(control)),
            vec![HotkeyEvent::PttActionReleased]
        );
        assert!(t.process(RawKey::FlagsChanged(ModifierState::default())).is_empty());
    }

    #[test]
    fn test_extra_modifier_releases_chord() {
        let mut t = tracker();
        t.process(RawKey::FlagsChanged(control_option()));

        let mut with_shift = control_option();
        with_shift.shift = true;
        assert_eq!(
            t.process(RawKey::FlagsChanged(with_shift)),
            vec![HotkeyEvent::PttActionReleased]
        );
    }

    #[test]
    fn test_key_chord_ignores_repeat() {
        let mut t = tracker();
        let down = RawKey::KeyDown {
            key_code: 46,
            modifiers: command_shift(),
            repeat: false,
        };
        let repeat = RawKey::KeyDown {
            key_code: 46,
            modifiers: command_shift(),
            repeat: true,
        };

        assert_eq!(t.process(down), vec![HotkeyEvent::ToggleMutePressed]);
        assert!(t.process(repeat).is_empty());
        // a second non-repeat down without key-up is a duplicate
        assert!(t.process(down).is_empty());
        // toggle has no release edge
        assert!(t.process(RawKey::KeyUp { key_code: 46 }).is_empty());
        assert_eq!(t.process(down), vec![HotkeyEvent::ToggleMutePressed]);
    }

    #[test]
    fn test_key_chord_requires_exact_modifiers() {
        let mut t = tracker();
        let down = RawKey::KeyDown {
            key_code: 46,
            modifiers: ModifierState {
                command: true,
                ..ModifierState::default()
            },
            repeat: false,
        };
        assert!(t.process(down).is_empty());
    }

    #[test]
    fn test_key_ptt_action_press_release() {
        let mut t = ChordTracker::new(&Shortcuts {
            toggle_mute: None,
            ptt_toggle: None,
            ptt_action: Some(Shortcut::key(49, ModifierState::default())),
        });

        let down = RawKey::KeyDown {
            key_code: 49,
            modifiers: ModifierState::default(),
            repeat: false,
        };
        assert_eq!(t.process(down), vec![HotkeyEvent::PttActionPressed]);
        assert_eq!(
            t.process(RawKey::KeyUp { key_code: 49 }),
            vec![HotkeyEvent::PttActionReleased]
        );
        assert!(t.process(RawKey::KeyUp { key_code: 49 }).is_empty());
    }

    #[test]
    fn test_conflicting_shortcut_dropped() {
        let t = ChordTracker::new(&Shortcuts {
            toggle_mute: Some(Shortcut::key(46, command_shift())),
            ptt_toggle: Some(Shortcut::key(46, command_shift())),
            ptt_action: Some(Shortcut::modifiers_only(ModifierState::default())),
        });
        // duplicate and empty modifier-only chords are both rejected
        assert_eq!(t.len(), 1);
    }
}
