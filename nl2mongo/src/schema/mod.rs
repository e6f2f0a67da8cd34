//! Inferred structural schema of a live database.
//!
//! A scan produces an immutable `DatabaseSnapshot`; the next scan supersedes
//! it wholesale. Consumers only ever read snapshots through an `Arc` owned by
//! the cache entry that produced them.

pub mod cache;
pub mod introspect;

use std::collections::BTreeSet;

use indexmap::IndexMap;
use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::db::IndexInfo;

pub use cache::SchemaCache;
pub use introspect::SchemaIntrospector;

/// Closed set of type tags a sampled value can map to. A field carries more
/// than one tag when sampled values disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    Null,
    Array,
    Date,
    Object,
    Integer,
    Double,
    Boolean,
    String,
    DateString,
    ObjectIdString,
    Email,
}

impl FieldType {
    /// Tag name as rendered into prompts.
    pub fn tag(&self) -> &'static str {
        match self {
            FieldType::Null => "null",
            FieldType::Array => "array",
            FieldType::Date => "date",
            FieldType::Object => "object",
            FieldType::Integer => "integer",
            FieldType::Double => "double",
            FieldType::Boolean => "boolean",
            FieldType::String => "string",
            FieldType::DateString => "date-string",
            FieldType::ObjectIdString => "objectid-string",
            FieldType::Email => "email",
        }
    }
}

/// What a bounded sample revealed about one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldProfile {
    /// Observed type tags across the sample.
    pub types: BTreeSet<FieldType>,
    /// First non-null observed value, truncated for display.
    pub sample: Option<Bson>,
}

/// Inferred schema of one collection at scan time.
///
/// Invariant: `fields` is the union of keys across all sampled documents, in
/// first-seen order; profile keys are members of `fields` by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: IndexMap<String, FieldProfile>,
    pub indexes: Vec<IndexInfo>,
    /// Exact count at scan time, not sampled.
    pub document_count: u64,
}

impl CollectionSchema {
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    /// Whether a (possibly dotted) key refers to a known field; dotted paths
    /// are matched on their head segment, since sampling only records
    /// top-level keys.
    pub fn knows_field(&self, key: &str) -> bool {
        let head = key.split('.').next().unwrap_or(key);
        self.fields.contains_key(head)
    }
}

/// Aggregate of collection schemas for one database at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub database: String,
    pub collections: Vec<CollectionSchema>,
    pub scanned_at: chrono::DateTime<chrono::Utc>,
    pub total_documents: u64,
}

impl DatabaseSnapshot {
    pub fn collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn collection_names(&self) -> Vec<&str> {
        self.collections.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

/// Builds field profiles from a sample, preserving first-seen key order.
pub(crate) fn profile_sample(sample: &[Document]) -> IndexMap<String, FieldProfile> {
    let mut fields: IndexMap<String, FieldProfile> = IndexMap::new();
    for doc in sample {
        for (key, value) in doc {
            let profile = fields.entry(key.clone()).or_default();
            profile.types.insert(introspect::infer_type(value));
            if profile.sample.is_none() && !matches!(value, Bson::Null) {
                profile.sample = Some(introspect::truncate_sample(value));
            }
        }
    }
    fields
}
