//! Active-hours gating against local wall-clock time

use chrono::{Local, Timelike};
use pulse_core::ActiveHours;
use std::sync::atomic::{AtomicU32, Ordering};

/// Source of the local minute of day
pub trait Clock: Send + Sync {
    /// Minutes since local midnight, `0..1440`
    fn minute_of_day(&self) -> u32;
}

/// Reads the host's local time zone
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn minute_of_day(&self) -> u32 {
        let now = Local::now();
        now.hour() * 60 + now.minute()
    }
}

/// Clock pinned to a settable minute
#[derive(Debug, Default)]
pub struct FixedClock {
    minute: AtomicU32,
}

impl FixedClock {
    pub fn new(minute_of_day: u32) -> Self {
        Self {
            minute: AtomicU32::new(minute_of_day),
        }
    }

    pub fn set(&self, minute_of_day: u32) {
        self.minute.store(minute_of_day, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn minute_of_day(&self) -> u32 {
        self.minute.load(Ordering::SeqCst)
    }
}

/// An agent without a window is always active
pub fn is_within_active_hours(window: Option<&ActiveHours>, minute_of_day: u32) -> bool {
    match window {
        Some(window) => window.contains(minute_of_day),
        None => true,
    }
}
