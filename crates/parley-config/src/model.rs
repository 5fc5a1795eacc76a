// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Parley pending-task engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a misspelled key fails
//! at startup instead of silently falling back to a default.

use serde::{Deserialize, Serialize};

/// Top-level Parley configuration.
///
/// Every section is optional and defaults to the values the engine ships with.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfig {
    /// Polling, heartbeat and staleness timing.
    #[serde(default)]
    pub sync: SyncConfig,

    /// User-visible texts synthesized by the engine.
    #[serde(default)]
    pub texts: TextsConfig,

    /// Snapshot store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Timing and limits for the task lifecycle.
///
/// Durations are milliseconds unless the key ends in `_secs`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Delay before the first status poll of a task.
    #[serde(default = "default_initial_poll_delay_ms")]
    pub initial_poll_delay_ms: u64,

    #[serde(default = "default_min_poll_delay_ms")]
    pub min_poll_delay_ms: u64,

    #[serde(default = "default_max_poll_delay_ms")]
    pub max_poll_delay_ms: u64,

    /// Multiplier applied to the poll delay after an in-progress status.
    #[serde(default = "default_poll_growth")]
    pub poll_growth: f64,

    /// Multiplier applied to the poll delay after a failed status request.
    #[serde(default = "default_error_backoff_factor")]
    pub error_backoff_factor: f64,

    #[serde(default = "default_max_error_backoff_ms")]
    pub max_error_backoff_ms: u64,

    /// Added to the poll delay when the server reports an unrecognized state.
    #[serde(default = "default_unknown_state_step_ms")]
    pub unknown_state_step_ms: u64,

    #[serde(default = "default_unknown_state_cap_ms")]
    pub unknown_state_cap_ms: u64,

    /// How often a live listener refreshes the snapshot's `saved_at`.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Snapshots older than this are considered abandoned.
    #[serde(default = "default_staleness_ttl_secs")]
    pub staleness_ttl_secs: u64,

    /// Cancel stays hidden until the task has been active this long.
    #[serde(default = "default_cancel_reveal_delay_ms")]
    pub cancel_reveal_delay_ms: u64,

    /// Fetch history once when a task finishes without a pushed answer.
    #[serde(default = "default_true")]
    pub refetch_history_on_done: bool,

    /// Prefix of every snapshot key in the store.
    #[serde(default = "default_storage_namespace")]
    pub storage_namespace: String,

    /// Longest accepted question, in characters.
    #[serde(default = "default_max_question_len")]
    pub max_question_len: usize,

    /// Minimum spacing between two ask calls, engine-wide.
    #[serde(default = "default_ask_cooldown_ms")]
    pub ask_cooldown_ms: u64,

    #[serde(default = "default_ask_max_retries")]
    pub ask_max_retries: u32,

    #[serde(default = "default_ask_base_backoff_ms")]
    pub ask_base_backoff_ms: u64,

    /// Deadline for a single ask attempt.
    #[serde(default = "default_ask_timeout_ms")]
    pub ask_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_poll_delay_ms: default_initial_poll_delay_ms(),
            min_poll_delay_ms: default_min_poll_delay_ms(),
            max_poll_delay_ms: default_max_poll_delay_ms(),
            poll_growth: default_poll_growth(),
            error_backoff_factor: default_error_backoff_factor(),
            max_error_backoff_ms: default_max_error_backoff_ms(),
            unknown_state_step_ms: default_unknown_state_step_ms(),
            unknown_state_cap_ms: default_unknown_state_cap_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            staleness_ttl_secs: default_staleness_ttl_secs(),
            cancel_reveal_delay_ms: default_cancel_reveal_delay_ms(),
            refetch_history_on_done: default_true(),
            storage_namespace: default_storage_namespace(),
            max_question_len: default_max_question_len(),
            ask_cooldown_ms: default_ask_cooldown_ms(),
            ask_max_retries: default_ask_max_retries(),
            ask_base_backoff_ms: default_ask_base_backoff_ms(),
            ask_timeout_ms: default_ask_timeout_ms(),
        }
    }
}

fn default_initial_poll_delay_ms() -> u64 {
    1200
}

fn default_min_poll_delay_ms() -> u64 {
    1000
}

fn default_max_poll_delay_ms() -> u64 {
    3000
}

fn default_poll_growth() -> f64 {
    1.2
}

fn default_error_backoff_factor() -> f64 {
    1.5
}

fn default_max_error_backoff_ms() -> u64 {
    5000
}

fn default_unknown_state_step_ms() -> u64 {
    500
}

fn default_unknown_state_cap_ms() -> u64 {
    4000
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_staleness_ttl_secs() -> u64 {
    30
}

fn default_cancel_reveal_delay_ms() -> u64 {
    450
}

fn default_true() -> bool {
    true
}

fn default_storage_namespace() -> String {
    "chat_state_v1:".to_string()
}

fn default_max_question_len() -> usize {
    999_999
}

fn default_ask_cooldown_ms() -> u64 {
    500
}

fn default_ask_max_retries() -> u32 {
    2
}

fn default_ask_base_backoff_ms() -> u64 {
    600
}

fn default_ask_timeout_ms() -> u64 {
    25_000
}

/// Texts the engine writes into the message list on the user's behalf.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TextsConfig {
    /// Body of the pending placeholder.
    #[serde(default = "default_pending_label")]
    pub pending_label: String,

    /// Shown when the ask could not be delivered.
    #[serde(default = "default_ask_failed")]
    pub ask_failed: String,

    /// Shown when the ask kept being rate limited.
    #[serde(default = "default_ask_rate_limited")]
    pub ask_rate_limited: String,

    /// Fallback answer when the server reports the task failed.
    #[serde(default = "default_processing_failed")]
    pub processing_failed: String,
}

impl Default for TextsConfig {
    fn default() -> Self {
        Self {
            pending_label: default_pending_label(),
            ask_failed: default_ask_failed(),
            ask_rate_limited: default_ask_rate_limited(),
            processing_failed: default_processing_failed(),
        }
    }
}

fn default_pending_label() -> String {
    "Processing...".to_string()
}

fn default_ask_failed() -> String {
    "Could not reach the server. Please try again.".to_string()
}

fn default_ask_rate_limited() -> String {
    "Too many requests right now. Please wait a moment and try again.".to_string()
}

fn default_processing_failed() -> String {
    "Sorry, the answer could not be generated. Please try again.".to_string()
}

/// Snapshot store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL journal mode.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_true(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("parley").join("parley.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("parley.db"))
        .to_string_lossy()
        .into_owned()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
