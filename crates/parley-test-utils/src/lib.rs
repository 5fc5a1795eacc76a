// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Parley integration tests.
//!
//! Provides a scripted backend and a harness that wires a [`SyncEngine`]
//! to an in-memory store and a [`TaskBus`], so engine behaviour can be
//! driven deterministically under paused tokio time.
//!
//! # Components
//!
//! - [`MockBackend`] - Scripted question/answer backend that records every call
//! - [`TestHarness`] - Engine, backend, push bus and store assembled for a test
//!
//! [`SyncEngine`]: parley_sync::SyncEngine
//! [`TaskBus`]: parley_bus::TaskBus

pub mod harness;
pub mod mock_backend;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_backend::{bot_row, user_row, BackendCall, MockBackend, RecordedCall};
