//! Structural and safety validation of actions.
//!
//! Errors block execution; warnings ride along for the caller to display.
//! Schema-aware checks only run when a snapshot is available and only ever
//! produce warnings: sampling is partial, so an unknown field name is a hint,
//! not proof of a mistake.

use mongodb::bson::{Bson, Document};

use crate::error::EngineError;
use crate::schema::{CollectionSchema, DatabaseSnapshot};
use crate::types::Action;

/// Outcome of validating one action.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapses the report into the pipeline error type, dropping warnings.
    pub fn into_result(self) -> Result<Vec<String>, EngineError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(EngineError::Validation {
                errors: self.errors,
            })
        }
    }
}

pub struct ActionValidator;

impl ActionValidator {
    pub fn validate(action: &Action, snapshot: Option<&DatabaseSnapshot>) -> ValidationReport {
        let mut report = ValidationReport::default();

        if action.collection().trim().is_empty() {
            report
                .errors
                .push("collection name must not be empty".to_string());
        }

        match action {
            Action::Delete { query, .. } => {
                if query.is_empty() {
                    report.errors.push(
                        "BLOCKED: delete with an empty filter would remove every document; \
                         narrow the request"
                            .to_string(),
                    );
                }
            }
            Action::Update { query, update, .. } => {
                if query.is_empty() {
                    report.errors.push(
                        "BLOCKED: update with an empty filter would modify every document; \
                         narrow the request"
                            .to_string(),
                    );
                }
                if update.is_empty() {
                    report
                        .errors
                        .push("update document must not be empty".to_string());
                } else if !update.keys().all(|k| k.starts_with('$')) {
                    report.errors.push(
                        "update document must use update operators ($set, $inc, ...)".to_string(),
                    );
                }
            }
            Action::Insert { documents, .. } => {
                if documents.is_empty() {
                    report
                        .errors
                        .push("insert carries no documents".to_string());
                }
            }
            Action::Aggregate { pipeline, .. } => {
                if pipeline.is_empty() {
                    report
                        .warnings
                        .push("aggregation pipeline is empty; this returns raw documents".to_string());
                }
            }
            Action::Find { .. } => {}
        }

        Self::check_options(action, &mut report);

        if let Some(snapshot) = snapshot {
            Self::check_against_schema(action, snapshot, &mut report);
        }

        report
    }

    fn check_options(action: &Action, report: &mut ValidationReport) {
        let options = action.options();

        if let Some(limit) = options.limit {
            if limit <= 0 {
                report
                    .warnings
                    .push(format!("limit {} is not positive and will be replaced", limit));
            }
        }

        if let Some(sort) = &options.sort {
            for (field, direction) in sort {
                if !is_valid_sort_direction(direction) {
                    report.warnings.push(format!(
                        "sort direction for '{}' is {}; valid directions are 1 and -1",
                        field, direction
                    ));
                }
            }
        }
    }

    fn check_against_schema(
        action: &Action,
        snapshot: &DatabaseSnapshot,
        report: &mut ValidationReport,
    ) {
        let Some(schema) = snapshot.collection(action.collection()) else {
            if !snapshot.is_empty() {
                report.warnings.push(format!(
                    "collection '{}' was not seen in the last scan (known: {})",
                    action.collection(),
                    snapshot.collection_names().join(", ")
                ));
            }
            return;
        };

        if let Some(query) = action.query() {
            Self::check_fields(query, schema, "query", report);
        }
        if let Some(projection) = &action.options().projection {
            Self::check_fields(projection, schema, "projection", report);
        }
        if let Some(sort) = &action.options().sort {
            Self::check_fields(sort, schema, "sort", report);
        }
    }

    /// Flags non-operator keys the scan never observed. Recurses into `$and`
    /// / `$or` arms so wrapped conditions are checked too.
    fn check_fields(
        doc: &Document,
        schema: &CollectionSchema,
        place: &str,
        report: &mut ValidationReport,
    ) {
        for (key, value) in doc {
            if key.starts_with('$') {
                if let Bson::Array(arms) = value {
                    for arm in arms {
                        if let Bson::Document(inner) = arm {
                            Self::check_fields(inner, schema, place, report);
                        }
                    }
                }
                continue;
            }
            if key == "_id" {
                continue;
            }
            if !schema.knows_field(key) {
                report.warnings.push(format!(
                    "field '{}' in {} was not seen in collection '{}'",
                    key, place, schema.name
                ));
            }
        }
    }
}

fn is_valid_sort_direction(value: &Bson) -> bool {
    matches!(
        value,
        Bson::Int32(1) | Bson::Int32(-1) | Bson::Int64(1) | Bson::Int64(-1)
    ) || matches!(value, Bson::Double(d) if *d == 1.0 || *d == -1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::profile_sample;
    use crate::types::ActionOptions;
    use chrono::Utc;
    use mongodb::bson::doc;

    fn snapshot() -> DatabaseSnapshot {
        DatabaseSnapshot {
            database: "shop".into(),
            collections: vec![CollectionSchema {
                name: "users".into(),
                fields: profile_sample(&[doc! { "name": "Ada", "age": 36 }]),
                indexes: vec![],
                document_count: 1,
            }],
            scanned_at: Utc::now(),
            total_documents: 1,
        }
    }

    #[test]
    fn empty_filter_delete_is_blocked() {
        let action = Action::Delete {
            collection: "users".into(),
            query: doc! {},
            options: ActionOptions::default(),
        };
        let report = ActionValidator::validate(&action, None);
        assert!(!report.is_valid());
        assert!(report.errors[0].starts_with("BLOCKED"));
    }

    #[test]
    fn empty_filter_update_is_blocked() {
        let action = Action::Update {
            collection: "users".into(),
            query: doc! {},
            update: doc! { "$set": { "active": false } },
            options: ActionOptions::default(),
        };
        let report = ActionValidator::validate(&action, None);
        assert!(report.errors.iter().any(|e| e.starts_with("BLOCKED")));
    }

    #[test]
    fn scoped_delete_passes() {
        let action = Action::Delete {
            collection: "users".into(),
            query: doc! { "status": "stale" },
            options: ActionOptions::default(),
        };
        assert!(ActionValidator::validate(&action, None).is_valid());
    }

    #[test]
    fn update_without_operators_is_rejected() {
        let action = Action::Update {
            collection: "users".into(),
            query: doc! { "name": "Ada" },
            update: doc! { "active": false },
            options: ActionOptions::default(),
        };
        let report = ActionValidator::validate(&action, None);
        assert!(report.errors.iter().any(|e| e.contains("update operators")));
    }

    #[test]
    fn insert_with_no_documents_is_rejected() {
        let action = Action::Insert {
            collection: "users".into(),
            documents: vec![],
            options: ActionOptions::default(),
        };
        assert!(!ActionValidator::validate(&action, None).is_valid());
    }

    #[test]
    fn bad_sort_direction_warns_but_does_not_block() {
        let action = Action::Find {
            collection: "users".into(),
            query: doc! {},
            options: ActionOptions {
                sort: Some(doc! { "age": 5 }),
                ..ActionOptions::default()
            },
        };
        let report = ActionValidator::validate(&action, None);
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("sort direction")));
    }

    #[test]
    fn unknown_field_warns_with_schema_present() {
        let action = Action::Find {
            collection: "users".into(),
            query: doc! { "salary": { "$gt": 100 } },
            options: ActionOptions::default(),
        };
        let report = ActionValidator::validate(&action, Some(&snapshot()));
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("'salary'")));
    }

    #[test]
    fn fields_inside_logical_operators_are_checked() {
        let action = Action::Find {
            collection: "users".into(),
            query: doc! { "$or": [ { "age": { "$gt": 30 } }, { "salary": 1 } ] },
            options: ActionOptions::default(),
        };
        let report = ActionValidator::validate(&action, Some(&snapshot()));
        assert!(report.warnings.iter().any(|w| w.contains("'salary'")));
        assert!(!report.warnings.iter().any(|w| w.contains("'age'")));
    }

    #[test]
    fn unknown_collection_warns() {
        let action = Action::Find {
            collection: "missing".into(),
            query: doc! {},
            options: ActionOptions::default(),
        };
        let report = ActionValidator::validate(&action, Some(&snapshot()));
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("'missing'") && w.contains("known")));
    }

    #[test]
    fn empty_pipeline_is_a_warning_not_an_error() {
        let action = Action::Aggregate {
            collection: "users".into(),
            pipeline: vec![],
            options: ActionOptions::default(),
        };
        let report = ActionValidator::validate(&action, None);
        assert!(report.is_valid());
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn into_result_surfaces_all_errors() {
        let action = Action::Update {
            collection: "".into(),
            query: doc! {},
            update: doc! {},
            options: ActionOptions::default(),
        };
        let err = ActionValidator::validate(&action, None)
            .into_result()
            .unwrap_err();
        match err {
            EngineError::Validation { errors } => assert!(errors.len() >= 3),
            other => panic!("unexpected error: {other}"),
        }
    }
}
