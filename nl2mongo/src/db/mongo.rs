//! MongoDB-backed implementation of the database capability.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::{Client, Database};

use super::{
    execution_error, ConnectionDescriptor, DatabaseConnector, DatabaseHandle, IndexInfo,
    InsertOutcome, ReadOptions, UpdateOutcome,
};
use crate::error::EngineError;

/// Connects through the official driver. Stateless; one `Client` per handle.
#[derive(Debug, Default)]
pub struct MongoConnector;

impl MongoConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseConnector for MongoConnector {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn DatabaseHandle>, EngineError> {
        let connection_failed = |message: String| EngineError::Connection {
            descriptor: descriptor.redacted(),
            message,
        };

        let client = Client::with_uri_str(&descriptor.uri)
            .await
            .map_err(|e| connection_failed(e.to_string()))?;
        let database = client.database(&descriptor.database);

        // The driver connects lazily; ping so an unreachable server fails
        // here as ConnectionError instead of mid-pipeline.
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| connection_failed(e.to_string()))?;

        Ok(Box::new(MongoHandle { client, database }))
    }
}

struct MongoHandle {
    client: Client,
    database: Database,
}

impl MongoHandle {
    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

#[async_trait]
impl DatabaseHandle for MongoHandle {
    async fn list_collection_names(&self) -> Result<Vec<String>, EngineError> {
        self.database
            .list_collection_names()
            .await
            .map_err(|e| execution_error("listCollections", "*", e.to_string()))
    }

    async fn sample(
        &self,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<Document>, EngineError> {
        let cursor = self
            .collection(collection)
            .find(doc! {})
            .limit(limit as i64)
            .await
            .map_err(|e| execution_error("sample", collection, e.to_string()))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| execution_error("sample", collection, e.to_string()))
    }

    async fn count_documents(&self, collection: &str) -> Result<u64, EngineError> {
        self.collection(collection)
            .count_documents(doc! {})
            .await
            .map_err(|e| execution_error("count", collection, e.to_string()))
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, EngineError> {
        let models: Vec<mongodb::IndexModel> = self
            .collection(collection)
            .list_indexes()
            .await
            .map_err(|e| execution_error("listIndexes", collection, e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| execution_error("listIndexes", collection, e.to_string()))?;

        Ok(models
            .into_iter()
            .map(|model| {
                let keys: Vec<String> = model.keys.keys().map(|k| k.to_string()).collect();
                let (name, unique) = match model.options {
                    Some(options) => (
                        options.name.unwrap_or_else(|| keys.join("_")),
                        options.unique.unwrap_or(false),
                    ),
                    None => (keys.join("_"), false),
                };
                IndexInfo { name, keys, unique }
            })
            .collect())
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: ReadOptions,
    ) -> Result<Vec<Document>, EngineError> {
        // The builder borrows the collection across the option calls below;
        // it needs its own binding.
        let coll = self.collection(collection);
        let mut builder = coll.find(filter);
        if let Some(limit) = options.limit {
            builder = builder.limit(limit);
        }
        if let Some(skip) = options.skip {
            builder = builder.skip(skip);
        }
        if let Some(sort) = options.sort {
            builder = builder.sort(sort);
        }
        if let Some(projection) = options.projection {
            builder = builder.projection(projection);
        }
        let cursor = builder
            .await
            .map_err(|e| execution_error("find", collection, e.to_string()))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| execution_error("find", collection, e.to_string()))
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, EngineError> {
        let cursor = self
            .collection(collection)
            .aggregate(pipeline)
            .await
            .map_err(|e| execution_error("aggregate", collection, e.to_string()))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| execution_error("aggregate", collection, e.to_string()))
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertOutcome, EngineError> {
        let result = self
            .collection(collection)
            .insert_many(documents)
            .await
            .map_err(|e| execution_error("insert", collection, e.to_string()))?;

        // inserted_ids is keyed by input position; report ids in that order.
        let mut pairs: Vec<_> = result.inserted_ids.into_iter().collect();
        pairs.sort_by_key(|(index, _)| *index);
        let inserted_ids: Vec<_> = pairs.into_iter().map(|(_, id)| id).collect();

        Ok(InsertOutcome {
            inserted_count: inserted_ids.len() as u64,
            inserted_ids,
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome, EngineError> {
        let result = self
            .collection(collection)
            .update_many(filter, update)
            .await
            .map_err(|e| execution_error("update", collection, e.to_string()))?;
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_count: result.upserted_id.map(|_| 1).unwrap_or(0),
        })
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<u64, EngineError> {
        let result = self
            .collection(collection)
            .delete_many(filter)
            .await
            .map_err(|e| execution_error("delete", collection, e.to_string()))?;
        Ok(result.deleted_count)
    }

    async fn close(self: Box<Self>) {
        let handle = *self;
        handle.client.shutdown().await;
    }
}
