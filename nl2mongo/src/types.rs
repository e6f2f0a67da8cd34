//! Core pipeline artifacts.
//!
//! `Action` is the structured, language-agnostic output of the translation
//! pipeline: a tagged union keyed by the action verb, so per-variant required
//! payloads exist by construction and "missing field" failures are enum-closed
//! rather than ad hoc. It is produced by the normalizer, checked by the
//! validator and consumed exactly once by the executor (or discarded if the
//! caller declines to run it).

use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::db::ConnectionDescriptor;

/// Shared, optional read modifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    /// Field -> direction map; valid directions are exactly `1` and `-1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Document>,
    /// Field-inclusion specification. `_id` is excluded unless requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<Document>,
}

/// A validated-or-pending database operation derived from natural language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Action {
    Find {
        collection: String,
        query: Document,
        #[serde(default)]
        options: ActionOptions,
    },
    Insert {
        collection: String,
        documents: Vec<Document>,
        #[serde(default)]
        options: ActionOptions,
    },
    Update {
        collection: String,
        query: Document,
        /// Update-operator document (`$set`, `$inc`, …), applied to all matches.
        update: Document,
        #[serde(default)]
        options: ActionOptions,
    },
    Delete {
        collection: String,
        query: Document,
        #[serde(default)]
        options: ActionOptions,
    },
    Aggregate {
        collection: String,
        pipeline: Vec<Document>,
        #[serde(default)]
        options: ActionOptions,
    },
}

impl Action {
    /// The action verb, as it appears on the wire.
    pub fn verb(&self) -> &'static str {
        match self {
            Action::Find { .. } => "find",
            Action::Insert { .. } => "insert",
            Action::Update { .. } => "update",
            Action::Delete { .. } => "delete",
            Action::Aggregate { .. } => "aggregate",
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            Action::Find { collection, .. }
            | Action::Insert { collection, .. }
            | Action::Update { collection, .. }
            | Action::Delete { collection, .. }
            | Action::Aggregate { collection, .. } => collection,
        }
    }

    /// Filter document, for the variants that carry one.
    pub fn query(&self) -> Option<&Document> {
        match self {
            Action::Find { query, .. }
            | Action::Update { query, .. }
            | Action::Delete { query, .. } => Some(query),
            _ => None,
        }
    }

    pub fn options(&self) -> &ActionOptions {
        match self {
            Action::Find { options, .. }
            | Action::Insert { options, .. }
            | Action::Update { options, .. }
            | Action::Delete { options, .. }
            | Action::Aggregate { options, .. } => options,
        }
    }

    /// Whether this action writes or removes data. Callers should confirm
    /// destructive actions before executing them.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Action::Insert { .. } | Action::Update { .. } | Action::Delete { .. }
        )
    }
}

/// Result envelope, discriminated by action kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExecutionResult {
    /// Ordered documents from a find or aggregate.
    Documents {
        documents: Vec<Document>,
        /// Fields a projection returned, when one was applied.
        #[serde(skip_serializing_if = "Option::is_none")]
        projected_fields: Option<Vec<String>>,
    },
    Inserted {
        inserted_count: u64,
        inserted_ids: Vec<Bson>,
    },
    Updated {
        matched_count: u64,
        modified_count: u64,
        upserted_count: u64,
    },
    Deleted { deleted_count: u64 },
}

/// Consumer-facing translation request.
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    pub user_text: String,
    pub descriptor: ConnectionDescriptor,
    /// Overrides the engine's configured preview limit for this request.
    pub preview_limit: Option<i64>,
    pub force_schema_refresh: bool,
}

impl TranslateRequest {
    pub fn new(user_text: impl Into<String>, descriptor: ConnectionDescriptor) -> Self {
        Self {
            user_text: user_text.into(),
            descriptor,
            preview_limit: None,
            force_schema_refresh: false,
        }
    }
}

/// Consumer-facing translation outcome. The action has passed validation but
/// has not been executed; destructive actions should be confirmed first.
#[derive(Debug, Clone, Serialize)]
pub struct Translation {
    pub action: Action,
    /// Whether a non-empty schema snapshot informed the prompt.
    pub schema_used: bool,
    /// Non-blocking validator findings, for the caller to display.
    pub warnings: Vec<String>,
}
