// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle of a conversation's task.

use std::fmt;

/// `Idle -> Submitting -> AwaitingResult -> {Resolved | Failed | Cancelled | Stale}`.
///
/// Every terminal phase returns to `Idle` once cleared. `Stale` may also go
/// straight back to `Submitting` when the question is reissued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPhase {
    Idle,
    Submitting,
    AwaitingResult,
    Resolved,
    Failed,
    Cancelled,
    Stale,
}

impl TaskPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::Failed | Self::Cancelled | Self::Stale
        )
    }

    pub fn can_transition_to(self, next: TaskPhase) -> bool {
        use TaskPhase::*;
        match (self, next) {
            (Idle, Submitting) => true,
            // A resumed task skips Submitting.
            (Idle, AwaitingResult) => true,
            (Submitting, AwaitingResult | Failed | Cancelled | Stale) => true,
            (AwaitingResult, Resolved | Failed | Cancelled | Stale) => true,
            (Stale, Submitting) => true,
            (from, Idle) => from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::AwaitingResult => "awaiting_result",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Stale => "stale",
        };
        f.write_str(name)
    }
}
