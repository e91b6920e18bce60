//! Configuration loading and management
//!
//! `Config` holds runtime paths derived from the environment. `Settings`
//! is the persisted, user-editable part, stored as TOML and owned by
//! `ConfigManager`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::hotkey::{ModifierState, Shortcut};

/// Application name, used for directories and notifications
pub const APP_NAME: &str = "hushkey";

/// Longest release delay accepted from the settings file
const MAX_RELEASE_DELAY_SECS: f64 = 10.0;

/// Daemon configuration
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Path to the persisted settings file
    pub settings_path: PathBuf,
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join(APP_NAME);

        let socket_path = match std::env::var_os("HUSHKEY_SOCKET") {
            Some(path) => PathBuf::from(path),
            None => data_dir.join("daemon.sock"),
        };

        let settings_path = match std::env::var_os("HUSHKEY_SETTINGS") {
            Some(path) => PathBuf::from(path),
            None => dirs::config_dir()
                .context("failed to resolve the user configuration directory")?
                .join(APP_NAME)
                .join("settings.toml"),
        };

        Ok(Self {
            socket_path,
            data_dir,
            settings_path,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

/// Persisted user settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Push-to-talk mode is on
    pub ptt_enabled: bool,

    /// Grace period after releasing the PTT chord before re-muting
    pub release_delay_secs: f64,

    /// Play sounds on mute/unmute and PTT transitions
    pub audio_feedback: bool,

    /// Show the on-screen overlay (consumed by the menu bar app)
    pub visual_feedback: bool,

    /// Persistent UIDs of devices that must never be muted
    pub excluded_device_uids: BTreeSet<String>,

    pub sounds: Sounds,

    pub shortcuts: Shortcuts,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ptt_enabled: false,
            release_delay_secs: 0.0,
            audio_feedback: true,
            visual_feedback: true,
            excluded_device_uids: BTreeSet::new(),
            sounds: Sounds::default(),
            shortcuts: Shortcuts::default(),
        }
    }
}

impl Settings {
    /// Release delay as a duration, clamped to a sane range.
    ///
    /// Negative and non-finite values mean "no delay".
    pub fn release_delay(&self) -> Duration {
        let secs = self.release_delay_secs;
        if !secs.is_finite() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(secs.min(MAX_RELEASE_DELAY_SECS))
    }
}

/// Feedback sound files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sounds {
    pub mute: PathBuf,
    pub unmute: PathBuf,
    pub ptt_activate: PathBuf,
    pub ptt_deactivate: PathBuf,
}

impl Default for Sounds {
    fn default() -> Self {
        let system = Path::new("/System/Library/Sounds");
        Self {
            mute: system.join("Pop.aiff"),
            unmute: system.join("Tink.aiff"),
            ptt_activate: system.join("Morse.aiff"),
            ptt_deactivate: system.join("Bottle.aiff"),
        }
    }
}

/// Global shortcut bindings; `None` leaves the action unbound.
///
/// A `[shortcuts]` table in the settings file replaces the defaults as a
/// whole, so an entry that is left out stays unbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortcuts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toggle_mute: Option<Shortcut>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptt_toggle: Option<Shortcut>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptt_action: Option<Shortcut>,
}

impl Default for Shortcuts {
    fn default() -> Self {
        let command_shift = ModifierState {
            command: true,
            shift: true,
            ..ModifierState::default()
        };
        Self {
            // ⌘⇧M
            toggle_mute: Some(Shortcut::key(46, command_shift)),
            // ⌘⇧P
            ptt_toggle: Some(Shortcut::key(35, command_shift)),
            // ⌃⌥ held
            ptt_action: Some(Shortcut::modifiers_only(ModifierState {
                control: true,
                option: true,
                ..ModifierState::default()
            })),
        }
    }
}

/// Loads and saves the settings file
pub struct ConfigManager {
    settings_path: PathBuf,
}

impl ConfigManager {
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    pub fn new(settings_path: PathBuf) -> Self {
        Self { settings_path }
    }

    /// Load settings, falling back to defaults when the file is missing
    pub fn load(&self) -> Result<Settings> {
        if !self.settings_path.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&self.settings_path)
            .with_context(|| format!("failed to read settings at {:?}", self.settings_path))?;

        toml::from_str(&content)
            .with_context(|| format!("failed to parse settings at {:?}", self.settings_path))
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        let dir = self
            .settings_path
            .parent()
            .with_context(|| format!("settings path {:?} has no parent", self.settings_path))?;

        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create settings directory {:?}", dir))?;

        let serialized =
            toml::to_string_pretty(settings).context("failed to serialize settings")?;

        fs::write(&self.settings_path, serialized)
            .with_context(|| format!("failed to write settings at {:?}", self.settings_path))?;

        Ok(())
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }
}
