//! Heartbeat scheduler for pulse
//!
//! Drives every configured agent off one consolidated timer, gates runs by
//! each agent's active hours and hands notify-worthy results to a notifier.

pub mod active_hours;
pub mod scheduler;

pub use active_hours::{Clock, FixedClock, SystemClock, is_within_active_hours};
pub use scheduler::HeartbeatScheduler;
