// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Parley pending-task engine.
//!
//! This crate provides the domain types shared by every other crate in the
//! workspace, the [`ParleyError`] taxonomy, and the adapter traits that sit at
//! each external seam: the question/answer backend, the push transport, and
//! the key-value store used for crash recovery.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::ParleyError;
pub use types::{
    AdapterType, AskReceipt, Author, ConversationId, HealthStatus, HistoryRow, Message,
    MessageId, Placeholder, PushPayload, QnaId, TaskId, TaskRecord, TaskState, TaskStatus,
};

// Re-export all adapter traits at crate root.
pub use traits::{
    KeyValueStore, PluginAdapter, PushSubscription, PushTransport, QnaBackend, UnsubscribeToken,
};
