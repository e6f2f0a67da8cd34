//! Schema introspection by bounded sampling.
//!
//! A scan enumerates every collection, samples a bounded number of documents
//! from each, infers per-field type tags, and separately fetches the exact
//! document count and the index list. Collections fan out concurrently; a
//! failure analyzing one collection is logged and that collection omitted,
//! never fatal to the whole scan.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use mongodb::bson::Bson;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::{profile_sample, CollectionSchema, DatabaseSnapshot, FieldType, SchemaCache};
use crate::db::{ConnectionDescriptor, DatabaseConnector, DatabaseHandle};
use crate::error::EngineError;

static DATE_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2})?(\.\d+)?(Z|[+-]\d{2}:?\d{2})?)?$").unwrap());
static OBJECTID_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{24}$").unwrap());
static EMAIL_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Maps one sampled value onto a type tag. Strings are sub-classified by
/// shape, since document stores routinely hold dates, object ids and emails
/// as plain strings.
pub(crate) fn infer_type(value: &Bson) -> FieldType {
    match value {
        Bson::Null => FieldType::Null,
        Bson::Array(_) => FieldType::Array,
        Bson::DateTime(_) | Bson::Timestamp(_) => FieldType::Date,
        Bson::Document(_) => FieldType::Object,
        Bson::Int32(_) | Bson::Int64(_) => FieldType::Integer,
        Bson::Double(_) | Bson::Decimal128(_) => FieldType::Double,
        Bson::Boolean(_) => FieldType::Boolean,
        Bson::ObjectId(_) => FieldType::ObjectIdString,
        Bson::String(s) => {
            if DATE_LIKE.is_match(s) {
                FieldType::DateString
            } else if OBJECTID_LIKE.is_match(s) {
                FieldType::ObjectIdString
            } else if EMAIL_LIKE.is_match(s) {
                FieldType::Email
            } else {
                FieldType::String
            }
        }
        _ => FieldType::String,
    }
}

const SAMPLE_STRING_LIMIT: usize = 60;
const SAMPLE_ARRAY_LIMIT: usize = 3;

/// Shortens a sample value for display inside prompts.
pub(crate) fn truncate_sample(value: &Bson) -> Bson {
    match value {
        Bson::String(s) if s.chars().count() > SAMPLE_STRING_LIMIT => {
            let mut short: String = s.chars().take(SAMPLE_STRING_LIMIT).collect();
            short.push('…');
            Bson::String(short)
        }
        Bson::Array(items) if items.len() > SAMPLE_ARRAY_LIMIT => {
            Bson::Array(items.iter().take(SAMPLE_ARRAY_LIMIT).map(truncate_sample).collect())
        }
        Bson::Document(d) => {
            // Keep keys only; nested values add prompt weight without
            // helping field resolution.
            let summary: Vec<String> = d.keys().cloned().collect();
            Bson::String(format!("{{{}}}", summary.join(", ")))
        }
        other => other.clone(),
    }
}

pub struct SchemaIntrospector {
    sample_size: usize,
}

impl SchemaIntrospector {
    pub fn new(sample_size: usize) -> Self {
        Self {
            sample_size: sample_size.clamp(1, 20),
        }
    }

    /// Scans every collection of the database behind `handle`. Read-only.
    pub async fn scan(
        &self,
        handle: &dyn DatabaseHandle,
        database: &str,
    ) -> Result<DatabaseSnapshot, EngineError> {
        let names = handle.list_collection_names().await?;

        let scans = names
            .iter()
            .map(|name| self.scan_collection(handle, name));
        let mut collections = Vec::with_capacity(names.len());
        for (name, result) in names.iter().zip(join_all(scans).await) {
            match result {
                Ok(schema) => collections.push(schema),
                Err(e) => {
                    // Degrade per collection; the rest of the snapshot is
                    // still usable.
                    warn!(collection = %name, error = %e, "skipping collection during scan");
                }
            }
        }

        let total_documents = collections.iter().map(|c| c.document_count).sum();
        debug!(
            database = %database,
            collections = collections.len(),
            total_documents,
            "schema scan complete"
        );

        Ok(DatabaseSnapshot {
            database: database.to_string(),
            collections,
            scanned_at: Utc::now(),
            total_documents,
        })
    }

    async fn scan_collection(
        &self,
        handle: &dyn DatabaseHandle,
        name: &str,
    ) -> Result<CollectionSchema, EngineError> {
        let sample = handle.sample(name, self.sample_size).await?;
        let document_count = handle.count_documents(name).await?;
        let indexes = handle.list_indexes(name).await?;

        Ok(CollectionSchema {
            name: name.to_string(),
            fields: profile_sample(&sample),
            indexes,
            document_count,
        })
    }

    /// Cache-aware scan: returns the cached snapshot when present, unexpired
    /// and refresh not forced; otherwise scans and replaces the entry. Opens
    /// a connection only on the scan path and closes it whether or not the
    /// scan succeeded.
    pub async fn cached(
        &self,
        connector: &dyn DatabaseConnector,
        descriptor: &ConnectionDescriptor,
        cache: &SchemaCache,
        force_refresh: bool,
    ) -> Result<Arc<DatabaseSnapshot>, EngineError> {
        let key = descriptor.cache_key();
        if !force_refresh {
            if let Some(snapshot) = cache.get(&key) {
                debug!(database = %descriptor.database, "schema cache hit");
                return Ok(snapshot);
            }
        }

        let handle = connector.connect(descriptor).await?;
        let result = self.scan(handle.as_ref(), &descriptor.database).await;
        handle.close().await;

        let snapshot = Arc::new(result?);
        cache.put(&key, Arc::clone(&snapshot));
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        IndexInfo, InsertOutcome, MemoryConnector, ReadOptions, UpdateOutcome,
    };
    use async_trait::async_trait;
    use mongodb::bson::{doc, Document};
    use std::time::Duration;

    #[test]
    fn string_subclassification() {
        assert_eq!(infer_type(&Bson::String("2024-05-01".into())), FieldType::DateString);
        assert_eq!(
            infer_type(&Bson::String("2024-05-01T10:30:00Z".into())),
            FieldType::DateString
        );
        assert_eq!(
            infer_type(&Bson::String("507f1f77bcf86cd799439011".into())),
            FieldType::ObjectIdString
        );
        assert_eq!(infer_type(&Bson::String("ada@example.com".into())), FieldType::Email);
        assert_eq!(infer_type(&Bson::String("plain text".into())), FieldType::String);
    }

    #[test]
    fn numeric_tags_distinguish_integer_from_double() {
        assert_eq!(infer_type(&Bson::Int32(7)), FieldType::Integer);
        assert_eq!(infer_type(&Bson::Int64(7)), FieldType::Integer);
        assert_eq!(infer_type(&Bson::Double(7.5)), FieldType::Double);
    }

    #[test]
    fn long_samples_are_truncated() {
        let long = "x".repeat(200);
        match truncate_sample(&Bson::String(long)) {
            Bson::String(s) => assert!(s.chars().count() <= SAMPLE_STRING_LIMIT + 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    fn seeded_connector() -> MemoryConnector {
        let connector = MemoryConnector::new();
        connector.seed(
            "users",
            vec![
                doc! { "name": "Ada", "age": 36, "email": "ada@example.com" },
                doc! { "name": "Blaise", "age": 29.5 },
            ],
        );
        connector.seed("orders", vec![doc! { "total": 10, "created": "2024-05-01" }]);
        connector
    }

    #[tokio::test]
    async fn scan_covers_every_collection_and_counts_exactly() {
        let connector = seeded_connector();
        let descriptor = ConnectionDescriptor::new("memory://", "shop");
        let handle = connector.connect(&descriptor).await.unwrap();
        let snapshot = SchemaIntrospector::new(12)
            .scan(handle.as_ref(), "shop")
            .await
            .unwrap();
        handle.close().await;

        assert_eq!(snapshot.collections.len(), 2);
        let users = snapshot.collection("users").unwrap();
        assert_eq!(users.document_count, 2);
        assert!(users.fields["age"].types.contains(&FieldType::Integer));
        assert!(users.fields["age"].types.contains(&FieldType::Double));
        assert!(users.fields["email"].types.contains(&FieldType::Email));
        let orders = snapshot.collection("orders").unwrap();
        assert!(orders.fields["created"].types.contains(&FieldType::DateString));
    }

    #[tokio::test]
    async fn cached_is_idempotent_within_ttl_and_rescans_on_force() {
        let connector = seeded_connector();
        let descriptor = ConnectionDescriptor::new("memory://", "shop");
        let cache = SchemaCache::new(Duration::from_secs(300));
        let introspector = SchemaIntrospector::new(12);

        let first = introspector
            .cached(&connector, &descriptor, &cache, false)
            .await
            .unwrap();
        let second = introspector
            .cached(&connector, &descriptor, &cache, false)
            .await
            .unwrap();
        // Same snapshot object, no rescan.
        assert!(Arc::ptr_eq(&first, &second));

        connector.seed("inventory", vec![doc! { "sku": "A-1" }]);
        let forced = introspector
            .cached(&connector, &descriptor, &cache, true)
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &forced));
        assert!(forced.collection("inventory").is_some());
    }

    /// Handle whose `sample` fails for one collection; the scan must degrade,
    /// not abort.
    struct FlakyHandle {
        inner: Box<dyn crate::db::DatabaseHandle>,
        bad: String,
    }

    #[async_trait]
    impl crate::db::DatabaseHandle for FlakyHandle {
        async fn list_collection_names(&self) -> Result<Vec<String>, EngineError> {
            self.inner.list_collection_names().await
        }
        async fn sample(&self, c: &str, n: usize) -> Result<Vec<Document>, EngineError> {
            if c == self.bad {
                return Err(crate::db::execution_error("sample", c, "boom"));
            }
            self.inner.sample(c, n).await
        }
        async fn count_documents(&self, c: &str) -> Result<u64, EngineError> {
            self.inner.count_documents(c).await
        }
        async fn list_indexes(&self, c: &str) -> Result<Vec<IndexInfo>, EngineError> {
            self.inner.list_indexes(c).await
        }
        async fn find(
            &self,
            c: &str,
            f: Document,
            o: ReadOptions,
        ) -> Result<Vec<Document>, EngineError> {
            self.inner.find(c, f, o).await
        }
        async fn aggregate(
            &self,
            c: &str,
            p: Vec<Document>,
        ) -> Result<Vec<Document>, EngineError> {
            self.inner.aggregate(c, p).await
        }
        async fn insert_many(
            &self,
            c: &str,
            d: Vec<Document>,
        ) -> Result<InsertOutcome, EngineError> {
            self.inner.insert_many(c, d).await
        }
        async fn update_many(
            &self,
            c: &str,
            f: Document,
            u: Document,
        ) -> Result<UpdateOutcome, EngineError> {
            self.inner.update_many(c, f, u).await
        }
        async fn delete_many(&self, c: &str, f: Document) -> Result<u64, EngineError> {
            self.inner.delete_many(c, f).await
        }
        async fn close(self: Box<Self>) {
            self.inner.close().await;
        }
    }

    #[tokio::test]
    async fn one_bad_collection_is_omitted_not_fatal() {
        let connector = seeded_connector();
        let descriptor = ConnectionDescriptor::new("memory://", "shop");
        let inner = connector.connect(&descriptor).await.unwrap();
        let handle = FlakyHandle {
            inner,
            bad: "orders".to_string(),
        };
        let snapshot = SchemaIntrospector::new(12)
            .scan(&handle, "shop")
            .await
            .unwrap();
        assert!(snapshot.collection("users").is_some());
        assert!(snapshot.collection("orders").is_none());
    }
}
