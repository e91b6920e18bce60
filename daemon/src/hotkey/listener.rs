//! Global hotkey listener using macOS CGEventTap
//!
//! Monitors system-wide key down/up and modifier changes, runs them
//! through a `ChordTracker`, and forwards the resulting edges.
//! Runs on a dedicated thread with its own CFRunLoop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType,
    EventField,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::chord::{ChordTracker, HotkeyEvent, RawKey};
use super::keys::ModifierState;
use crate::config::Shortcuts;

/// What the tap callback hands to the run loop thread
#[derive(Debug)]
enum TapMessage {
    Key(RawKey),
    Disabled,
}

/// Global hotkey listener that turns configured chords into `HotkeyEvent`s
pub struct HotkeyListener {
    event_tx: mpsc::Sender<HotkeyEvent>,
    shortcuts: Shortcuts,
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    /// Create a new hotkey listener
    pub fn new(event_tx: mpsc::Sender<HotkeyEvent>, shortcuts: Shortcuts) -> Self {
        Self {
            event_tx,
            shortcuts,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the hotkey listener
    ///
    /// This spawns a dedicated thread that runs a CFRunLoop to receive
    /// CGEventTap callbacks. The listener runs until `stop()` is called
    /// or the program exits.
    pub fn start(&self) -> Result<(), HotkeyError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        let event_tx = self.event_tx.clone();
        let running = Arc::clone(&self.running);
        let tracker = ChordTracker::new(&self.shortcuts);
        info!(bindings = tracker.len(), "hotkey bindings resolved");

        thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");

                if let Err(e) = run_event_loop(event_tx, tracker, running.clone()) {
                    error!(?e, "hotkey listener error");
                }

                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                HotkeyError::ThreadSpawn(e.to_string())
            })?;

        Ok(())
    }

    /// Stop the hotkey listener; the run loop exits on its next poll
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the listener is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Errors that can occur in the hotkey listener
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to create run loop source for the event tap")]
    RunLoopSource,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),
}

fn raw_key(event_type: CGEventType, event: &CGEvent) -> Option<RawKey> {
    let modifiers = ModifierState::from_flags(event.get_flags());
    match event_type {
        CGEventType::FlagsChanged => Some(RawKey::FlagsChanged(modifiers)),
        CGEventType::KeyDown => Some(RawKey::KeyDown {
            key_code: event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16,
            modifiers,
            repeat: event.get_integer_value_field(EventField::KEYBOARD_EVENT_AUTOREPEAT) != 0,
        }),
        CGEventType::KeyUp => Some(RawKey::KeyUp {
            key_code: event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16,
        }),
        _ => None,
    }
}

/// Run the CFRunLoop with the event tap
fn run_event_loop(
    event_tx: mpsc::Sender<HotkeyEvent>,
    mut tracker: ChordTracker,
    running: Arc<AtomicBool>,
) -> Result<(), HotkeyError> {
    let (callback_tx, callback_rx) = std::sync::mpsc::channel::<TapMessage>();

    // CGEventTap callback - must be fast and non-blocking
    let callback = move |_proxy: core_graphics::event::CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
          -> Option<CGEvent> {
        match event_type {
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                let _ = callback_tx.send(TapMessage::Disabled);
            }
            _ => {
                if let Some(raw) = raw_key(event_type, event) {
                    let _ = callback_tx.send(TapMessage::Key(raw));
                }
            }
        }
        Some(event.clone())
    };

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![
            CGEventType::KeyDown,
            CGEventType::KeyUp,
            CGEventType::FlagsChanged,
        ],
        callback,
    )
    .map_err(|_| {
        error!("failed to create event tap - is Accessibility permission granted?");
        HotkeyError::EventTapCreation
    })?;

    tap.enable();

    let run_loop_source = tap
        .mach_port
        .create_runloop_source(0)
        .map_err(|_| HotkeyError::RunLoopSource)?;
    let run_loop = CFRunLoop::get_current();

    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }

    info!("event tap created and enabled");

    while running.load(Ordering::SeqCst) {
        CFRunLoop::run_in_mode(
            unsafe { kCFRunLoopDefaultMode },
            std::time::Duration::from_millis(100),
            true,
        );

        while let Ok(message) = callback_rx.try_recv() {
            let events = match message {
                TapMessage::Key(raw) => tracker.process(raw),
                TapMessage::Disabled => {
                    warn!("event tap disabled by the system, re-enabling");
                    tap.enable();
                    vec![HotkeyEvent::TapDisabled]
                }
            };

            for event in events {
                debug!(?event, "forwarding hotkey event");
                // Not in an async context, so block until the loop has room
                if event_tx.blocking_send(event).is_err() {
                    warn!("failed to send hotkey event - channel closed");
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}
