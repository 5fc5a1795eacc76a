// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pending-task reconciliation engine.
//!
//! Tracks one long-running question per conversation across a push channel
//! and a polling fallback, persists a snapshot so the task survives a
//! restart, and reconciles that snapshot with server history whenever a
//! conversation is loaded or regains focus.
//!
//! [`SyncEngine`] is the entry point. The building blocks it is made of are
//! public for embedders that need them directly:
//!
//! - [`PersistenceGateway`] and the versioned [`Snapshot`] codec
//! - [`DualChannelListener`] with its [`PollSchedule`]
//! - [`project`], the pure message list projection

pub mod backoff;
pub mod cancel;
mod conversation;
pub mod engine;
pub mod gateway;
pub mod listener;
pub mod phase;
pub mod projector;
mod reconcile;
mod shared;
pub mod snapshot;
pub mod submitter;

pub use backoff::PollSchedule;
pub use cancel::CancelOutcome;
pub use engine::{ConversationStatus, SyncEngine};
pub use gateway::PersistenceGateway;
pub use listener::DualChannelListener;
pub use phase::TaskPhase;
pub use projector::{project, PendingView};
pub use snapshot::Snapshot;
pub use submitter::SubmitOutcome;
