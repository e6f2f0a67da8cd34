//! Action execution.
//!
//! Opens a fresh handle per execution and closes it on every exit path. The
//! executor re-checks the write-scope rule on its own: an action that skipped
//! validation must still be unable to wipe a collection here.

use std::sync::Arc;

use mongodb::bson::{Bson, Document};
use tracing::{info, warn};

use crate::db::{ConnectionDescriptor, DatabaseConnector, DatabaseHandle, ReadOptions};
use crate::error::EngineError;
use crate::types::{Action, ExecutionResult};

/// Applied when an action reaches execution without any limit at all.
const FALLBACK_LIMIT: i64 = 100;

pub struct Executor {
    connector: Arc<dyn DatabaseConnector>,
}

impl Executor {
    pub fn new(connector: Arc<dyn DatabaseConnector>) -> Self {
        Self { connector }
    }

    pub async fn execute(
        &self,
        action: &Action,
        descriptor: &ConnectionDescriptor,
    ) -> Result<ExecutionResult, EngineError> {
        // Last line of defense, independent of the validator.
        match action {
            Action::Delete { query, .. } if query.is_empty() => {
                return Err(EngineError::Validation {
                    errors: vec![
                        "BLOCKED: refusing to execute delete with an empty filter".to_string(),
                    ],
                });
            }
            Action::Update { query, .. } if query.is_empty() => {
                return Err(EngineError::Validation {
                    errors: vec![
                        "BLOCKED: refusing to execute update with an empty filter".to_string(),
                    ],
                });
            }
            _ => {}
        }

        let handle = self.connector.connect(descriptor).await?;
        let result = self.run(action, handle.as_ref()).await;
        handle.close().await;

        if result.is_ok() {
            info!(
                action = action.verb(),
                collection = action.collection(),
                target = %descriptor.redacted(),
                "action executed"
            );
        }
        result
    }

    async fn run(
        &self,
        action: &Action,
        handle: &dyn DatabaseHandle,
    ) -> Result<ExecutionResult, EngineError> {
        match action {
            Action::Find {
                collection,
                query,
                options,
            } => {
                let read = ReadOptions {
                    limit: Some(effective_limit(options.limit)),
                    skip: options.skip,
                    sort: options.sort.as_ref().map(sanitize_sort),
                    projection: options.projection.clone(),
                };
                let projected = options.projection.as_ref().map(projected_fields);
                let documents = handle.find(collection, query.clone(), read).await?;
                Ok(ExecutionResult::Documents {
                    documents,
                    projected_fields: projected,
                })
            }
            Action::Aggregate {
                collection,
                pipeline,
                ..
            } => {
                // The pipeline runs verbatim; injecting a $limit here would
                // silently truncate aggregation results.
                let documents = handle.aggregate(collection, pipeline.clone()).await?;
                Ok(ExecutionResult::Documents {
                    documents,
                    projected_fields: None,
                })
            }
            Action::Insert {
                collection,
                documents,
                ..
            } => {
                let outcome = handle.insert_many(collection, documents.clone()).await?;
                Ok(ExecutionResult::Inserted {
                    inserted_count: outcome.inserted_count,
                    inserted_ids: outcome.inserted_ids,
                })
            }
            Action::Update {
                collection,
                query,
                update,
                ..
            } => {
                let outcome = handle
                    .update_many(collection, query.clone(), update.clone())
                    .await?;
                Ok(ExecutionResult::Updated {
                    matched_count: outcome.matched_count,
                    modified_count: outcome.modified_count,
                    upserted_count: outcome.upserted_count,
                })
            }
            Action::Delete {
                collection, query, ..
            } => {
                let deleted_count = handle.delete_many(collection, query.clone()).await?;
                Ok(ExecutionResult::Deleted { deleted_count })
            }
        }
    }
}

fn effective_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(n) if n > 0 => n,
        Some(n) => {
            warn!(limit = n, fallback = FALLBACK_LIMIT, "non-positive limit replaced");
            FALLBACK_LIMIT
        }
        None => FALLBACK_LIMIT,
    }
}

/// Coerces every sort direction to a valid one. Anything that is not exactly
/// 1 or -1 becomes ascending, logged, so a bad direction degrades instead of
/// failing the whole action.
fn sanitize_sort(sort: &Document) -> Document {
    let mut clean = Document::new();
    for (field, direction) in sort {
        let coerced = match direction {
            Bson::Int32(1) | Bson::Int64(1) => 1,
            Bson::Int32(-1) | Bson::Int64(-1) => -1,
            Bson::Double(d) if *d == 1.0 => 1,
            Bson::Double(d) if *d == -1.0 => -1,
            other => {
                warn!(field = field.as_str(), direction = %other, "invalid sort direction coerced to 1");
                1
            }
        };
        clean.insert(field, coerced);
    }
    clean
}

/// Fields an inclusion projection returns. `_id` appears only when the
/// projection asks for it explicitly.
fn projected_fields(projection: &Document) -> Vec<String> {
    projection
        .iter()
        .filter(|(_, v)| !matches!(v, Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false)))
        .map(|(k, _)| k.clone())
        .collect()
}
