//! State machine module for push-to-talk and mute toggling
//!
//! Provides an explicit state machine with three states:
//! - Inactive: no session, mic rests muted while PTT mode is on
//! - Active: action chord held, mic live
//! - Releasing: chord released, mic live until the countdown finalizes
//!
//! Time is injected through the `Scheduler` trait so tests can run the
//! release countdown on a virtual clock.

mod machine;
mod timer;

pub use machine::{Microphone, StateMachine};
#[cfg(test)]
pub use machine::PttState;
#[cfg(test)]
pub use timer::ManualScheduler;
#[cfg(target_os = "macos")]
pub use timer::TokioScheduler;
pub use timer::{Scheduler, TimerToken};
