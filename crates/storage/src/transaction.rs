//! Commit batches for atomic multi-document writes.
//!
//! A [`CommitBatch`] is what a [`DocumentSession`](crate::DocumentSession)
//! hands to [`DocumentStore::commit`](crate::DocumentStore::commit). Every
//! command in a batch is validated before any is applied, so a batch either
//! lands completely or not at all.
//!
//! # Concurrency modes
//!
//! | Mode | Checked per command | Bookkeeping |
//! |------|---------------------|-------------|
//! | [`ConcurrencyMode::ChangeVector`] | the command's [`WriteCondition`] | none |
//! | [`ConcurrencyMode::AtomicClaim`] | the command's [`GuardExpectation`] | one guard per document |
//!
//! Atomic-guard mode ignores write conditions; the guard subsumes them.
//! Guards are removed only by atomic-guard deletes. A document deleted by a
//! bulk operation leaves its guard behind, which is why collections targeted
//! by bulk maintenance are written in change-vector mode.
//!
//! # Example
//!
//! ```
//! use identity_docstore::{CommitBatch, ConcurrencyMode, WriteCondition};
//! use serde_json::json;
//!
//! let batch = CommitBatch::new(ConcurrencyMode::ChangeVector)
//!     .put("tokens/r1", "Tokens", json!({ "status": "valid" }), WriteCondition::MustNotExist);
//! assert_eq!(batch.len(), 1);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ChangeVector, GuardIndex};

/// Concurrency discipline a session commits under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// Per-document optimistic concurrency through change vectors.
    #[default]
    ChangeVector,
    /// All-or-nothing commit guarded by per-document atomic guards.
    AtomicClaim,
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChangeVector => f.write_str("change-vector"),
            Self::AtomicClaim => f.write_str("atomic-claim"),
        }
    }
}

/// Condition a change-vector mode write must satisfy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteCondition {
    /// No check.
    #[default]
    Unconditional,
    /// The document must not exist yet.
    MustNotExist,
    /// The stored change vector must equal this one.
    ChangeVector(ChangeVector),
}

/// Atomic guard state an atomic-guard mode write expects to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardExpectation {
    /// Neither the document nor its guard may exist.
    Absent,
    /// The guard must still be at this index.
    Index(GuardIndex),
    /// The session saw the document without a guard; it must still have none.
    Unguarded,
}

/// A single staged write.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Create or replace a document.
    Put {
        /// Document id.
        id: String,
        /// Target collection.
        collection: String,
        /// New body.
        body: Value,
        /// Change-vector mode condition.
        condition: WriteCondition,
        /// Atomic-guard mode expectation.
        guard: GuardExpectation,
        /// Store-managed expiry to attach.
        expires_at: Option<DateTime<Utc>>,
    },
    /// Remove a document.
    Delete {
        /// Document id.
        id: String,
        /// Change-vector mode condition.
        condition: WriteCondition,
        /// Atomic-guard mode expectation.
        guard: GuardExpectation,
    },
}

impl Command {
    /// Returns the id the command targets.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Put { id, .. } | Self::Delete { id, .. } => id,
        }
    }
}

/// An ordered list of commands committed atomically under one mode.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitBatch {
    /// Mode the batch is validated under.
    pub mode: ConcurrencyMode,
    /// Commands in staging order.
    pub commands: Vec<Command>,
}

impl CommitBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new(mode: ConcurrencyMode) -> Self {
        Self { mode, commands: Vec::new() }
    }

    /// Appends a put of a document that the session has not observed.
    #[must_use]
    pub fn put(
        mut self,
        id: impl Into<String>,
        collection: impl Into<String>,
        body: Value,
        condition: WriteCondition,
    ) -> Self {
        self.commands.push(Command::Put {
            id: id.into(),
            collection: collection.into(),
            body,
            condition,
            guard: GuardExpectation::Absent,
            expires_at: None,
        });
        self
    }

    /// Appends a delete of a document that the session has not observed.
    #[must_use]
    pub fn delete(mut self, id: impl Into<String>, condition: WriteCondition) -> Self {
        self.commands.push(Command::Delete {
            id: id.into(),
            condition,
            guard: GuardExpectation::Unguarded,
        });
        self
    }

    /// Appends a fully specified command.
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Number of commands in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if the batch has no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Outcome of one applied command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Document id.
    pub id: String,
    /// New change vector; `None` for deletes.
    pub change_vector: Option<ChangeVector>,
    /// New guard index; `None` for deletes and change-vector mode writes.
    pub guard: Option<GuardIndex>,
}

/// Per-command results of a successful commit, in command order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Results in command order.
    pub results: Vec<CommandResult>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn builder_helpers_record_commands_in_order() {
        let batch = CommitBatch::new(ConcurrencyMode::AtomicClaim)
            .put("scopes/1-A", "Scopes", json!({ "name": "read" }), WriteCondition::Unconditional)
            .delete("uniques/scopename/read", WriteCondition::Unconditional);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.commands[0].id(), "scopes/1-A");
        assert_eq!(batch.commands[1].id(), "uniques/scopename/read");
    }

    #[test]
    fn mode_defaults_to_change_vector() {
        assert_eq!(ConcurrencyMode::default(), ConcurrencyMode::ChangeVector);
        assert_eq!(ConcurrencyMode::AtomicClaim.to_string(), "atomic-claim");
    }
}
