// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key-value stores holding Parley's per-conversation snapshots.
//!
//! [`SqliteStore`] persists to a single SQLite file through tokio-rusqlite's
//! background thread. [`MemoryStore`] keeps everything in process and is what
//! tests and embedders without a disk use.

pub mod database;
pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use database::Database;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
