// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key-value store trait used for snapshot persistence.

use async_trait::async_trait;

use crate::error::ParleyError;
use crate::traits::adapter::PluginAdapter;

/// Minimal string key-value store.
///
/// Writes are last-write-wins. The engine never relies on a write having
/// landed and repairs divergence at reconciliation time.
#[async_trait]
pub trait KeyValueStore: PluginAdapter {
    async fn get_item(&self, key: &str) -> Result<Option<String>, ParleyError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), ParleyError>;
}
