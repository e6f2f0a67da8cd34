//! In-memory implementation of the database capability.
//!
//! Backs unit tests and offline demos with a small subset of the query
//! language: top-level field equality, `$eq/$ne/$gt/$gte/$lt/$lte/$in/$nin/
//! $exists/$regex` (with `$options: "i"`), `$and`/`$or`, dotted paths, sort,
//! skip, limit and projections. Updates support `$set`, `$inc` and `$unset`.
//! Anything outside that subset fails loudly rather than approximating.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mongodb::bson::{oid::ObjectId, Bson, Document};

use super::{
    execution_error, ConnectionDescriptor, DatabaseConnector, DatabaseHandle, IndexInfo,
    InsertOutcome, ReadOptions, UpdateOutcome,
};
use crate::error::EngineError;

type Store = Arc<Mutex<BTreeMap<String, Vec<Document>>>>;

/// Shared in-memory store; every handle connected through one connector sees
/// the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    data: Store,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection with fixture documents, replacing prior contents.
    pub fn seed(&self, collection: &str, documents: Vec<Document>) {
        self.data
            .lock()
            .expect("memory store poisoned")
            .insert(collection.to_string(), documents);
    }

    /// Current contents of a collection, for assertions.
    pub fn contents(&self, collection: &str) -> Vec<Document> {
        self.data
            .lock()
            .expect("memory store poisoned")
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DatabaseConnector for MemoryConnector {
    async fn connect(
        &self,
        _descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn DatabaseHandle>, EngineError> {
        Ok(Box::new(MemoryHandle {
            data: Arc::clone(&self.data),
        }))
    }
}

struct MemoryHandle {
    data: Store,
}

impl MemoryHandle {
    fn with_collection<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Vec<Document>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut guard = self.data.lock().expect("memory store poisoned");
        let docs = guard.entry(collection.to_string()).or_default();
        f(docs)
    }
}

#[async_trait]
impl DatabaseHandle for MemoryHandle {
    async fn list_collection_names(&self) -> Result<Vec<String>, EngineError> {
        Ok(self
            .data
            .lock()
            .expect("memory store poisoned")
            .keys()
            .cloned()
            .collect())
    }

    async fn sample(
        &self,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<Document>, EngineError> {
        self.with_collection(collection, |docs| {
            Ok(docs.iter().take(limit).cloned().collect())
        })
    }

    async fn count_documents(&self, collection: &str) -> Result<u64, EngineError> {
        self.with_collection(collection, |docs| Ok(docs.len() as u64))
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, EngineError> {
        let _ = collection;
        Ok(vec![IndexInfo {
            name: "_id_".to_string(),
            keys: vec!["_id".to_string()],
            unique: true,
        }])
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: ReadOptions,
    ) -> Result<Vec<Document>, EngineError> {
        self.with_collection(collection, |docs| {
            let mut matched = Vec::new();
            for doc in docs.iter() {
                if matches_filter(doc, &filter).map_err(|m| execution_error("find", collection, m))? {
                    matched.push(doc.clone());
                }
            }
            if let Some(sort) = &options.sort {
                sort_documents(&mut matched, sort);
            }
            let skip = options.skip.unwrap_or(0) as usize;
            let mut matched: Vec<Document> = matched.into_iter().skip(skip).collect();
            if let Some(limit) = options.limit {
                matched.truncate(limit.max(0) as usize);
            }
            if let Some(projection) = &options.projection {
                matched = matched
                    .into_iter()
                    .map(|d| apply_projection(&d, projection))
                    .collect();
            }
            Ok(matched)
        })
    }

    async fn aggregate(
        &self,
        collection: &str,
        _pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, EngineError> {
        // The memory backend has no pipeline engine; real aggregations run
        // against the MongoDB backend only.
        Err(execution_error(
            "aggregate",
            collection,
            "aggregation pipelines are not supported by the in-memory backend",
        ))
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertOutcome, EngineError> {
        self.with_collection(collection, |docs| {
            let mut inserted_ids = Vec::with_capacity(documents.len());
            for mut doc in documents {
                let id = doc
                    .get("_id")
                    .cloned()
                    .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
                doc.insert("_id", id.clone());
                inserted_ids.push(id);
                docs.push(doc);
            }
            Ok(InsertOutcome {
                inserted_count: inserted_ids.len() as u64,
                inserted_ids,
            })
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome, EngineError> {
        self.with_collection(collection, |docs| {
            let mut matched = 0u64;
            let mut modified = 0u64;
            for doc in docs.iter_mut() {
                if matches_filter(doc, &filter)
                    .map_err(|m| execution_error("update", collection, m))?
                {
                    matched += 1;
                    if apply_update(doc, &update)
                        .map_err(|m| execution_error("update", collection, m))?
                    {
                        modified += 1;
                    }
                }
            }
            Ok(UpdateOutcome {
                matched_count: matched,
                modified_count: modified,
                upserted_count: 0,
            })
        })
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64, EngineError> {
        self.with_collection(collection, |docs| {
            let before = docs.len();
            let mut error = None;
            docs.retain(|doc| match matches_filter(doc, &filter) {
                Ok(matched) => !matched,
                Err(m) => {
                    error.get_or_insert(m);
                    true
                }
            });
            if let Some(message) = error {
                return Err(execution_error("delete", collection, message));
            }
            Ok((before - docs.len()) as u64)
        })
    }

    async fn close(self: Box<Self>) {}
}

/// Dotted-path lookup, descending embedded documents.
fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current = doc;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let value = current.get(part)?;
        if parts.peek().is_none() {
            return Some(value);
        }
        current = value.as_document()?;
    }
    None
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Cross-type-aware equality: numerics compare by value, everything else
/// by bson equality.
fn bson_eq(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn bson_cmp(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn matches_filter(doc: &Document, filter: &Document) -> Result<bool, String> {
    for (key, condition) in filter {
        match key.as_str() {
            "$and" | "$or" => {
                let clauses = condition
                    .as_array()
                    .ok_or_else(|| format!("{} expects an array of filters", key))?;
                let mut hits = 0usize;
                for clause in clauses {
                    let clause = clause
                        .as_document()
                        .ok_or_else(|| format!("{} clauses must be documents", key))?;
                    if matches_filter(doc, clause)? {
                        hits += 1;
                    }
                }
                let ok = if key == "$and" {
                    hits == clauses.len()
                } else {
                    hits > 0
                };
                if !ok {
                    return Ok(false);
                }
            }
            _ => {
                let value = lookup_path(doc, key);
                if !matches_condition(value, condition)? {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> Result<bool, String> {
    let operators = match condition.as_document() {
        Some(d) if d.keys().any(|k| k.starts_with('$')) => d,
        _ => {
            // Plain value: equality.
            return Ok(value.map(|v| bson_eq(v, condition)).unwrap_or(false));
        }
    };

    let case_insensitive = matches!(operators.get_str("$options"), Ok(opts) if opts.contains('i'));

    for (op, operand) in operators {
        let ok = match op.as_str() {
            "$eq" => value.map(|v| bson_eq(v, operand)).unwrap_or(false),
            "$ne" => !value.map(|v| bson_eq(v, operand)).unwrap_or(false),
            "$gt" => cmp_matches(value, operand, |o| o == Ordering::Greater),
            "$gte" => cmp_matches(value, operand, |o| o != Ordering::Less),
            "$lt" => cmp_matches(value, operand, |o| o == Ordering::Less),
            "$lte" => cmp_matches(value, operand, |o| o != Ordering::Greater),
            "$in" => {
                let candidates = operand
                    .as_array()
                    .ok_or_else(|| "$in expects an array".to_string())?;
                value
                    .map(|v| candidates.iter().any(|c| bson_eq(v, c)))
                    .unwrap_or(false)
            }
            "$nin" => {
                let candidates = operand
                    .as_array()
                    .ok_or_else(|| "$nin expects an array".to_string())?;
                !value
                    .map(|v| candidates.iter().any(|c| bson_eq(v, c)))
                    .unwrap_or(false)
            }
            "$exists" => {
                let expected = operand.as_bool().unwrap_or(true);
                value.is_some() == expected
            }
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| "$regex expects a string pattern".to_string())?;
                let pattern = if case_insensitive {
                    format!("(?i){}", pattern)
                } else {
                    pattern.to_string()
                };
                let re = regex::Regex::new(&pattern)
                    .map_err(|e| format!("invalid $regex pattern: {}", e))?;
                match value {
                    Some(Bson::String(s)) => re.is_match(s),
                    _ => false,
                }
            }
            "$options" => true, // consumed alongside $regex
            other => return Err(format!("unsupported filter operator '{}'", other)),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn cmp_matches(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    value
        .and_then(|v| bson_cmp(v, operand))
        .map(accept)
        .unwrap_or(false)
}

fn sort_documents(docs: &mut [Document], sort: &Document) {
    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let ascending = as_f64(direction).map(|d| d >= 0.0).unwrap_or(true);
            let ordering = match (lookup_path(a, field), lookup_path(b, field)) {
                (Some(x), Some(y)) => bson_cmp(x, y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            let ordering = if ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn apply_projection(doc: &Document, projection: &Document) -> Document {
    let truthy = |v: &Bson| as_f64(v).map(|n| n != 0.0).unwrap_or(v.as_bool() == Some(true));
    let inclusion = projection
        .iter()
        .any(|(k, v)| k != "_id" && truthy(v));

    let mut out = Document::new();
    if inclusion {
        for (key, flag) in projection {
            if key == "_id" || !truthy(flag) {
                continue;
            }
            if let Some(value) = lookup_path(doc, key) {
                out.insert(key.clone(), value.clone());
            }
        }
        let id_included = matches!(projection.get("_id"), Some(v) if truthy(v));
        if id_included {
            if let Some(id) = doc.get("_id") {
                out.insert("_id", id.clone());
            }
        }
    } else {
        out = doc.clone();
        for (key, flag) in projection {
            if !truthy(flag) {
                out.remove(key);
            }
        }
    }
    out
}

fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

/// Applies `$set`/`$inc`/`$unset`. Returns whether the document changed.
fn apply_update(doc: &mut Document, update: &Document) -> Result<bool, String> {
    let before = doc.clone();
    for (op, operand) in update {
        let fields = operand
            .as_document()
            .ok_or_else(|| format!("{} expects a document", op))?;
        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(doc, path, value.clone());
                }
            }
            "$inc" => {
                for (path, delta) in fields {
                    let delta = as_f64(delta).ok_or_else(|| "$inc expects a number".to_string())?;
                    let current = lookup_path(doc, path).and_then(as_f64).unwrap_or(0.0);
                    let next = current + delta;
                    let value = if next.fract() == 0.0 {
                        Bson::Int64(next as i64)
                    } else {
                        Bson::Double(next)
                    };
                    set_path(doc, path, value);
                }
            }
            "$unset" => {
                for (path, _) in fields {
                    doc.remove(path);
                }
            }
            other => return Err(format!("unsupported update operator '{}'", other)),
        }
    }
    Ok(*doc != before)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    fn users() -> Vec<Document> {
        vec![
            doc! { "_id": 1, "name": "Ada", "age": 36, "email": "ada@example.com" },
            doc! { "_id": 2, "name": "Blaise", "age": 29 },
            doc! { "_id": 3, "name": "Curie", "age": 41, "email": "curie@example.com" },
        ]
    }

    fn handle() -> (MemoryConnector, MemoryHandle) {
        let connector = MemoryConnector::new();
        connector.seed("users", users());
        let data = Arc::clone(&connector.data);
        (connector, MemoryHandle { data })
    }

    #[tokio::test]
    async fn find_with_range_sort_and_limit() {
        let (_c, handle) = handle();
        let found = handle
            .find(
                "users",
                doc! { "age": { "$gt": 28 } },
                ReadOptions {
                    sort: Some(doc! { "age": -1 }),
                    limit: Some(2),
                    ..ReadOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].get_str("name").unwrap(), "Curie");
        assert_eq!(found[1].get_str("name").unwrap(), "Ada");
    }

    #[tokio::test]
    async fn regex_filter_honours_case_insensitive_option() {
        let (_c, handle) = handle();
        let found = handle
            .find(
                "users",
                doc! { "name": { "$regex": "^ada", "$options": "i" } },
                ReadOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn projection_inclusion_drops_id_unless_requested() {
        let (_c, handle) = handle();
        let found = handle
            .find(
                "users",
                doc! {},
                ReadOptions {
                    projection: Some(doc! { "name": 1 }),
                    ..ReadOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(found.iter().all(|d| d.get("_id").is_none()));
        assert!(found.iter().all(|d| d.get("name").is_some()));
    }

    #[tokio::test]
    async fn update_many_reports_matched_and_modified() {
        let (_c, handle) = handle();
        let outcome = handle
            .update_many(
                "users",
                doc! { "age": { "$gte": 36 } },
                doc! { "$set": { "senior": true } },
            )
            .await
            .unwrap();
        assert_eq!(outcome.matched_count, 2);
        assert_eq!(outcome.modified_count, 2);

        // Re-applying the same update matches but modifies nothing.
        let outcome = handle
            .update_many(
                "users",
                doc! { "age": { "$gte": 36 } },
                doc! { "$set": { "senior": true } },
            )
            .await
            .unwrap();
        assert_eq!(outcome.matched_count, 2);
        assert_eq!(outcome.modified_count, 0);
    }

    #[tokio::test]
    async fn delete_many_removes_only_matches() {
        let (connector, handle) = handle();
        let deleted = handle
            .delete_many("users", doc! { "email": { "$exists": false } })
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(connector.contents("users").len(), 2);
    }

    #[tokio::test]
    async fn unknown_operator_is_an_error_not_a_miss() {
        let (_c, handle) = handle();
        let err = handle
            .find("users", doc! { "age": { "$near": 30 } }, ReadOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("$near"));
    }

    #[tokio::test]
    async fn insert_generates_missing_ids() {
        let (_c, handle) = handle();
        let outcome = handle
            .insert_many("users", vec![doc! { "name": "Darwin" }])
            .await
            .unwrap();
        assert_eq!(outcome.inserted_count, 1);
        assert!(matches!(outcome.inserted_ids[0], Bson::ObjectId(_)));
    }
}
