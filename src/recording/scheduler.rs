// src/recording/scheduler.rs
//! Soft periodic flush timing
//!
//! The interval is a floor on the gap between flush completions: the next
//! deadline is armed from the moment a flush finishes, never from when it
//! started. Callers pass `now` explicitly.

use crate::utils::errors::{RecorderError, Result};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FlushScheduler {
    interval: Duration,
    next_deadline: Instant,
}

impl FlushScheduler {
    /// Arm the first deadline at `now + interval`
    pub fn new(interval: Duration, now: Instant) -> Result<Self> {
        if interval.is_zero() {
            return Err(RecorderError::Config(
                "flush_interval must be a positive duration".to_string(),
            ));
        }

        Ok(Self {
            interval,
            next_deadline: now + interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Time left until the deadline, zero once it has passed
    pub fn remaining_wait(&self, now: Instant) -> Duration {
        self.next_deadline.saturating_duration_since(now)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_deadline
    }

    /// Re-arm after a flush finished at `now`
    pub fn on_flush_completed(&mut self, now: Instant) {
        self.next_deadline = now + self.interval;
    }
}
