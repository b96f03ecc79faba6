//! A typed configuration record replacing the dynamic configuration
//! objects a JS-style source would use. Every tunable is a named field with
//! a documented default and a bounds check in [`Config::validate`], the way
//! `ConnectionParams::validate` works in `gcodekit4-communication`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub baud_rate: u32,
    pub window_bytes: usize,
    pub poll_interval_ms: u64,
    pub fast_poll_interval_ms: u64,
    pub slow_poll_interval_ms: u64,
    pub look_ahead_lines: usize,
    pub response_timeout_ms: u64,
    pub max_retries: u32,
    pub cb_threshold: u32,
    pub cb_cooldown_ms: u64,
    pub checkpoint_interval_lines: usize,
    pub position_tolerance_mm: f64,
    pub max_homing_retries: u32,
    pub auto_recover_alarms: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            window_bytes: 128,
            poll_interval_ms: 250,
            fast_poll_interval_ms: 100,
            slow_poll_interval_ms: 2_000,
            look_ahead_lines: 15,
            response_timeout_ms: 10_000,
            max_retries: 3,
            cb_threshold: 5,
            cb_cooldown_ms: 30_000,
            checkpoint_interval_lines: 500,
            position_tolerance_mm: 0.01,
            max_homing_retries: 2,
            auto_recover_alarms: true,
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fast_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fast_poll_interval_ms)
    }

    pub fn slow_poll_interval(&self) -> Duration {
        Duration::from_millis(self.slow_poll_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn cb_cooldown(&self) -> Duration {
        Duration::from_millis(self.cb_cooldown_ms)
    }

    /// Bounds-checks every field; returns the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.window_bytes == 0 {
            return Err(Error::other("window_bytes must be greater than zero"));
        }
        if self.look_ahead_lines == 0 {
            return Err(Error::other("look_ahead_lines must be greater than zero"));
        }
        if self.poll_interval_ms == 0 || self.fast_poll_interval_ms == 0 || self.slow_poll_interval_ms == 0 {
            return Err(Error::other("poll intervals must be greater than zero"));
        }
        if self.fast_poll_interval_ms > self.poll_interval_ms {
            return Err(Error::other("fast_poll_interval_ms must not exceed poll_interval_ms"));
        }
        if self.slow_poll_interval_ms < self.poll_interval_ms {
            return Err(Error::other("slow_poll_interval_ms must not be less than poll_interval_ms"));
        }
        if self.response_timeout_ms == 0 {
            return Err(Error::other("response_timeout_ms must be greater than zero"));
        }
        if self.position_tolerance_mm < 0.0 {
            return Err(Error::other("position_tolerance_mm must not be negative"));
        }
        if self.baud_rate == 0 {
            return Err(Error::other("baud_rate must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_external_interface_table() {
        let cfg = Config::default();
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.window_bytes, 128);
        assert_eq!(cfg.poll_interval_ms, 250);
        assert_eq!(cfg.fast_poll_interval_ms, 100);
        assert_eq!(cfg.slow_poll_interval_ms, 2_000);
        assert_eq!(cfg.look_ahead_lines, 15);
        assert_eq!(cfg.response_timeout_ms, 10_000);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.cb_threshold, 5);
        assert_eq!(cfg.cb_cooldown_ms, 30_000);
        assert_eq!(cfg.checkpoint_interval_lines, 500);
        assert_eq!(cfg.position_tolerance_mm, 0.01);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_window() {
        let mut cfg = Config::default();
        cfg.window_bytes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_fast_poll_slower_than_base() {
        let mut cfg = Config::default();
        cfg.fast_poll_interval_ms = 300;
        assert!(cfg.validate().is_err());
    }
}
