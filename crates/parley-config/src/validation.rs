// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cross-field validation that serde attributes cannot express.

use crate::diagnostic::ConfigError;
use crate::model::ParleyConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Check a deserialized configuration for semantic correctness.
///
/// Collects every violation rather than stopping at the first one.
pub fn validate_config(config: &ParleyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });
    let sync = &config.sync;

    if sync.min_poll_delay_ms > sync.max_poll_delay_ms {
        fail(format!(
            "sync.min_poll_delay_ms ({}) must not exceed sync.max_poll_delay_ms ({})",
            sync.min_poll_delay_ms, sync.max_poll_delay_ms
        ));
    } else if !(sync.min_poll_delay_ms..=sync.max_poll_delay_ms)
        .contains(&sync.initial_poll_delay_ms)
    {
        fail(format!(
            "sync.initial_poll_delay_ms ({}) must lie within [{}, {}]",
            sync.initial_poll_delay_ms, sync.min_poll_delay_ms, sync.max_poll_delay_ms
        ));
    }

    if !(sync.poll_growth >= 1.0) {
        fail(format!(
            "sync.poll_growth must be at least 1.0, got {}",
            sync.poll_growth
        ));
    }

    if !(sync.error_backoff_factor > 1.0) {
        fail(format!(
            "sync.error_backoff_factor must be greater than 1.0, got {}",
            sync.error_backoff_factor
        ));
    }

    // A listener whose heartbeat is slower than the TTL gets swept while alive.
    if sync.heartbeat_interval_secs >= sync.staleness_ttl_secs {
        fail(format!(
            "sync.heartbeat_interval_secs ({}) must be less than sync.staleness_ttl_secs ({})",
            sync.heartbeat_interval_secs, sync.staleness_ttl_secs
        ));
    }

    if sync.heartbeat_interval_secs == 0 {
        fail("sync.heartbeat_interval_secs must be greater than 0".to_string());
    }

    if sync.storage_namespace.trim().is_empty() {
        fail("sync.storage_namespace must not be empty".to_string());
    }

    if sync.max_question_len == 0 {
        fail("sync.max_question_len must be greater than 0".to_string());
    }

    if sync.ask_timeout_ms == 0 {
        fail("sync.ask_timeout_ms must be greater than 0".to_string());
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    let level = config.log.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        fail(format!(
            "log.level `{}` is not one of: {}",
            config.log.level,
            LOG_LEVELS.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
