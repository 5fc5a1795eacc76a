// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Poll delay schedule for the status loop.

use std::time::Duration;

use parley_config::model::SyncConfig;

/// Computes successive poll delays, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSchedule {
    initial_ms: u64,
    min_ms: u64,
    max_ms: u64,
    growth: f64,
    error_factor: f64,
    max_error_ms: u64,
    unknown_step_ms: u64,
    unknown_cap_ms: u64,
}

impl PollSchedule {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            initial_ms: config.initial_poll_delay_ms,
            min_ms: config.min_poll_delay_ms,
            max_ms: config.max_poll_delay_ms,
            growth: config.poll_growth,
            error_factor: config.error_backoff_factor,
            max_error_ms: config.max_error_backoff_ms,
            unknown_step_ms: config.unknown_state_step_ms,
            unknown_cap_ms: config.unknown_state_cap_ms,
        }
    }

    pub fn initial(&self) -> u64 {
        self.initial_ms
    }

    /// Next delay after a queued or running status:
    /// `clamp(round(d * growth), min, max)`.
    pub fn after_progress(&self, delay_ms: u64) -> u64 {
        scale(delay_ms, self.growth).clamp(self.min_ms, self.max_ms)
    }

    /// Next delay after the status request itself failed:
    /// `min(max_error, round(d * factor))`.
    pub fn after_error(&self, delay_ms: u64) -> u64 {
        scale(delay_ms, self.error_factor).min(self.max_error_ms)
    }

    /// Next delay after a status the engine does not recognize.
    pub fn after_unknown(&self, delay_ms: u64) -> u64 {
        delay_ms
            .saturating_add(self.unknown_step_ms)
            .min(self.unknown_cap_ms)
    }
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

fn scale(delay_ms: u64, factor: f64) -> u64 {
    let scaled = (delay_ms as f64 * factor).round();
    if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    }
}

pub(crate) fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn progress_sequence_grows_then_saturates() {
        let schedule = PollSchedule::default();
        let mut delay = schedule.initial();
        let mut seen = vec![delay];
        for _ in 0..7 {
            delay = schedule.after_progress(delay);
            seen.push(delay);
        }
        assert_eq!(seen, vec![1200, 1440, 1728, 2074, 2489, 2987, 3000, 3000]);
    }

    #[test]
    fn error_backoff_caps_at_five_seconds() {
        let schedule = PollSchedule::default();
        assert_eq!(schedule.after_error(1200), 1800);
        assert_eq!(schedule.after_error(3000), 4500);
        assert_eq!(schedule.after_error(4500), 5000);
        assert_eq!(schedule.after_error(5000), 5000);
    }

    #[test]
    fn unknown_state_steps_up_to_cap() {
        let schedule = PollSchedule::default();
        assert_eq!(schedule.after_unknown(1200), 1700);
        assert_eq!(schedule.after_unknown(3800), 4000);
        assert_eq!(schedule.after_unknown(4000), 4000);
    }

    #[test]
    fn progress_after_error_backoff_snaps_into_range() {
        let schedule = PollSchedule::default();
        assert_eq!(schedule.after_progress(5000), 3000);
    }

    proptest! {
        #[test]
        fn progress_delay_always_within_bounds(delay in 0u64..1_000_000) {
            let next = PollSchedule::default().after_progress(delay);
            prop_assert!((1000..=3000).contains(&next));
            let expected = ((delay as f64 * 1.2).round() as u64).clamp(1000, 3000);
            prop_assert_eq!(next, expected);
        }

        #[test]
        fn error_delay_never_exceeds_cap(delay in 0u64..1_000_000) {
            prop_assert!(PollSchedule::default().after_error(delay) <= 5000);
        }
    }
}
