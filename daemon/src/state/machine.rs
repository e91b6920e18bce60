//! Push-to-talk and toggle state machine
//!
//! Handles transitions between Inactive, Active and Releasing based on
//! hotkey edges, timer fires and device disconnects. Every mute change goes
//! through a `Microphone`, whose published state is only ever confirmed by
//! the OS; the machine never assumes its own request succeeded.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::timer::{Scheduler, TimerKind, TimerToken};
use crate::config::{Settings, Sounds};
use crate::events::{Notice, StateEvent};
use crate::feedback::{Feedback, PermissionCheck};
use crate::hotkey::HotkeyEvent;

/// Standard toggle presses closer together than this are dropped
pub const TOGGLE_DEBOUNCE: Duration = Duration::from_millis(300);

const TICK: Duration = Duration::from_secs(1);

/// Push-to-talk session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PttState {
    /// No session; the mic rests muted while PTT mode is on
    #[default]
    Inactive,
    /// Action chord held, mic live
    Active,
    /// Chord released, mic still live until the countdown finalizes
    Releasing { remaining: u32 },
}

impl PttState {
    pub fn is_active(&self) -> bool {
        !matches!(self, PttState::Inactive)
    }

    pub fn countdown(&self) -> Option<u32> {
        match self {
            PttState::Releasing { remaining } => Some(*remaining),
            _ => None,
        }
    }
}

impl std::fmt::Display for PttState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PttState::Inactive => write!(f, "Inactive"),
            PttState::Active => write!(f, "Active"),
            PttState::Releasing { remaining } => write!(f, "Releasing({}s)", remaining),
        }
    }
}

/// The mute surface the machine drives
pub trait Microphone {
    /// Request a mute change; failures are absorbed by the implementation
    fn set_mute(&mut self, muted: bool);

    /// Last confirmed mute state
    fn is_muted(&self) -> bool;

    fn is_input_device_available(&self) -> bool;
}

/// Initial countdown value for a release delay: whole seconds rounded up,
/// never below 1
pub fn countdown_start(delay: Duration) -> u32 {
    let secs = delay.as_secs_f64().ceil();
    (secs as u32).max(1)
}

/// The state machine that owns the PTT session
pub struct StateMachine<S: Scheduler> {
    state: PttState,
    ptt_enabled: bool,
    release_delay: Duration,
    audio_feedback: bool,
    sounds: Sounds,
    scheduler: S,
    /// Tokens of the live timers; anything else that fires is stale
    finalize_timer: Option<TimerToken>,
    tick_timer: Option<TimerToken>,
    /// Release instant and starting value of the running countdown
    countdown_origin: Option<(Instant, u32)>,
    /// Time of the last accepted standard toggle
    last_toggle: Option<Instant>,
    feedback: Box<dyn Feedback>,
    permission: Box<dyn PermissionCheck>,
    event_tx: broadcast::Sender<StateEvent>,
}

impl<S: Scheduler> StateMachine<S> {
    pub fn new(
        settings: &Settings,
        scheduler: S,
        feedback: Box<dyn Feedback>,
        permission: Box<dyn PermissionCheck>,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Self {
        Self {
            state: PttState::Inactive,
            ptt_enabled: settings.ptt_enabled,
            release_delay: settings.release_delay(),
            audio_feedback: settings.audio_feedback,
            sounds: settings.sounds.clone(),
            scheduler,
            finalize_timer: None,
            tick_timer: None,
            countdown_origin: None,
            last_toggle: None,
            feedback,
            permission,
            event_tx,
        }
    }

    pub fn state(&self) -> PttState {
        self.state
    }

    pub fn ptt_enabled(&self) -> bool {
        self.ptt_enabled
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Pick up edited settings.
    ///
    /// Delay and sound changes apply to the next release. A change of the
    /// PTT flag behaves like the mode toggle.
    pub fn apply_settings(&mut self, settings: &Settings, mic: &mut impl Microphone) {
        self.release_delay = settings.release_delay();
        self.audio_feedback = settings.audio_feedback;
        self.sounds = settings.sounds.clone();
        if settings.ptt_enabled != self.ptt_enabled {
            self.set_ptt_enabled(settings.ptt_enabled, mic);
        }
    }

    /// Put the mic in the resting state for the current mode
    pub fn start(&mut self, mic: &mut impl Microphone) {
        info!(
            ptt_enabled = self.ptt_enabled,
            release_delay = ?self.release_delay,
            "state machine started in Inactive state"
        );
        if self.ptt_enabled {
            mic.set_mute(true);
        }
    }

    /// Process a hotkey edge
    pub fn handle_hotkey(&mut self, event: HotkeyEvent, mic: &mut impl Microphone) {
        debug!(?event, state = %self.state, "hotkey event");
        match event {
            HotkeyEvent::ToggleMutePressed => self.on_toggle_mute(mic),
            HotkeyEvent::PttModeTogglePressed => {
                let enabled = !self.ptt_enabled;
                self.set_ptt_enabled(enabled, mic);
            }
            HotkeyEvent::PttActionPressed => self.on_ptt_pressed(mic),
            HotkeyEvent::PttActionReleased => self.on_ptt_released(mic),
            HotkeyEvent::TapDisabled => {
                warn!("hotkey tap was disabled, events may have been missed");
            }
        }
    }

    /// Process a fired timer
    pub fn handle_timer(&mut self, token: TimerToken, mic: &mut impl Microphone) {
        match token.kind {
            TimerKind::ReleaseFinalize if self.finalize_timer == Some(token) => {
                self.finalize_timer = None;
                self.finalize(mic, true);
            }
            TimerKind::CountdownTick if self.tick_timer == Some(token) => {
                self.tick_timer = None;
                self.on_tick();
            }
            _ => debug!(?token, "stale timer ignored"),
        }
    }

    /// The default input device went away
    pub fn handle_device_disconnected(&mut self, mic: &mut impl Microphone) {
        if !self.state.is_active() {
            debug!("device disconnected with no session, nothing to release");
            return;
        }
        warn!(state = %self.state, "input device disconnected during push-to-talk");
        self.finalize(mic, false);
        self.notice(Notice::DeviceDisconnected);
    }

    fn on_toggle_mute(&mut self, mic: &mut impl Microphone) {
        let now = self.scheduler.now();
        if let Some(last) = self.last_toggle {
            if now.duration_since(last) < TOGGLE_DEBOUNCE {
                debug!("toggle press debounced");
                return;
            }
        }
        self.last_toggle = Some(now);

        if self.state.is_active() {
            info!(state = %self.state, "toggle interrupts push-to-talk");
            self.cancel_timers();
            self.transition_to(PttState::Inactive);
        }

        mic.set_mute(!mic.is_muted());
        let sound = if mic.is_muted() {
            self.sounds.mute.clone()
        } else {
            self.sounds.unmute.clone()
        };
        self.play(&sound);
    }

    fn set_ptt_enabled(&mut self, enabled: bool, mic: &mut impl Microphone) {
        if enabled == self.ptt_enabled {
            return;
        }
        self.ptt_enabled = enabled;
        info!(enabled, "push-to-talk mode changed");
        let _ = self.event_tx.send(StateEvent::PttModeChanged { enabled });

        if enabled {
            // PTT rests muted
            if !self.state.is_active() {
                mic.set_mute(true);
            }
        } else if self.state.is_active() {
            self.finalize(mic, true);
        }
    }

    fn on_ptt_pressed(&mut self, mic: &mut impl Microphone) {
        if !self.ptt_enabled {
            return;
        }

        match self.state {
            PttState::Releasing { .. } => {
                // Catch the in-flight release: mic is still live
                self.cancel_timers();
                self.transition_to(PttState::Active);
            }
            PttState::Active => debug!("already active, press ignored"),
            PttState::Inactive => {
                if !self.permission.microphone_granted() {
                    info!("microphone permission missing, push-to-talk blocked");
                    self.notice(Notice::PermissionDenied);
                    return;
                }
                if !mic.is_input_device_available() {
                    info!("no input device, push-to-talk blocked");
                    self.notice(Notice::NoInputDevice);
                    return;
                }
                self.transition_to(PttState::Active);
                mic.set_mute(false);
                let sound = self.sounds.ptt_activate.clone();
                self.play(&sound);
            }
        }
    }

    fn on_ptt_released(&mut self, mic: &mut impl Microphone) {
        if !self.ptt_enabled || self.state != PttState::Active {
            return;
        }

        if self.release_delay.is_zero() {
            self.finalize(mic, true);
            return;
        }

        let remaining = countdown_start(self.release_delay);
        self.countdown_origin = Some((self.scheduler.now(), remaining));
        self.finalize_timer = Some(
            self.scheduler
                .schedule(TimerKind::ReleaseFinalize, self.release_delay),
        );
        if remaining > 1 {
            self.schedule_tick(remaining);
        }
        self.transition_to(PttState::Releasing { remaining });
    }

    fn on_tick(&mut self) {
        let PttState::Releasing { remaining } = self.state else {
            return;
        };
        // The display stops at 1; the finalize timer clears it
        if remaining <= 1 {
            return;
        }
        let remaining = remaining - 1;
        if remaining > 1 {
            self.schedule_tick(remaining);
        }
        self.transition_to(PttState::Releasing { remaining });
    }

    /// Schedule the tick that follows `remaining`, anchored to the release
    /// instant so late handling does not accumulate
    fn schedule_tick(&mut self, remaining: u32) {
        let Some((released_at, start)) = self.countdown_origin else {
            return;
        };
        let due = released_at + TICK * (start - remaining + 1);
        let after = due.saturating_duration_since(self.scheduler.now());
        self.tick_timer = Some(self.scheduler.schedule(TimerKind::CountdownTick, after));
    }

    /// End the session muted
    fn finalize(&mut self, mic: &mut impl Microphone, with_sound: bool) {
        self.cancel_timers();
        self.transition_to(PttState::Inactive);
        mic.set_mute(true);
        if with_sound {
            let sound = self.sounds.ptt_deactivate.clone();
            self.play(&sound);
        }
    }

    fn cancel_timers(&mut self) {
        self.countdown_origin = None;
        if self.finalize_timer.take().is_some() {
            self.scheduler.cancel(TimerKind::ReleaseFinalize);
        }
        if self.tick_timer.take().is_some() {
            self.scheduler.cancel(TimerKind::CountdownTick);
        }
    }

    /// Transition to a new state and publish what changed
    fn transition_to(&mut self, new_state: PttState) {
        let old_state = self.state;
        if old_state == new_state {
            return;
        }
        self.state = new_state;

        info!(from = %old_state, to = %new_state, "state transition");

        if old_state.is_active() != new_state.is_active() {
            let _ = self.event_tx.send(StateEvent::PttActiveChanged {
                active: new_state.is_active(),
            });
        }
        if old_state.countdown() != new_state.countdown() {
            let _ = self.event_tx.send(StateEvent::CountdownChanged {
                remaining: new_state.countdown(),
            });
        }
    }

    fn notice(&self, notice: Notice) {
        let _ = self.event_tx.send(StateEvent::Notice { notice });
    }

    fn play(&self, sound: &std::path::Path) {
        if self.audio_feedback {
            self.feedback.play(sound);
        }
    }
}
