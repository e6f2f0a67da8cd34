//! Natural-language to MongoDB operation translation.
//!
//! The pipeline: introspect the live database into a bounded schema snapshot,
//! compose a prompt around it, obtain a completion from an ordered provider
//! chain, normalize the completion into a structured [`Action`], validate it
//! against safety rules and the observed schema, and (separately, at the
//! caller's discretion) execute it.
//!
//! Translation and execution are distinct calls on purpose: a destructive
//! action should pass through the caller's confirmation before it runs.
//!
//! ```no_run
//! use std::sync::Arc;
//! use nl2mongo::{
//!     ConnectionDescriptor, EngineConfig, MongoConnector, QueryEngine, TranslateRequest,
//! };
//!
//! # async fn demo() -> Result<(), nl2mongo::EngineError> {
//! let config = EngineConfig::from_env()?;
//! let engine = QueryEngine::new(config, Arc::new(MongoConnector::new()))?;
//!
//! let descriptor = ConnectionDescriptor::new("mongodb://localhost:27017", "shop");
//! let translation = engine
//!     .translate(&TranslateRequest::new("find all users over 30", descriptor.clone()))
//!     .await?;
//!
//! if !translation.action.is_destructive() {
//!     let result = engine.execute(&translation.action, &descriptor).await?;
//!     println!("{:?}", result);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod execute;
pub mod normalize;
pub mod prompt;
pub mod provider;
pub mod schema;
pub mod types;
pub mod validate;

pub use config::{CacheConfig, EngineConfig, ProviderConfig, ProviderKind, RetryConfig};
pub use db::{ConnectionDescriptor, DatabaseConnector, DatabaseHandle, MemoryConnector, MongoConnector};
pub use engine::QueryEngine;
pub use error::{EngineError, ProviderError};
pub use execute::Executor;
pub use normalize::ResponseNormalizer;
pub use prompt::ContextComposer;
pub use provider::{ModelOrchestrator, ModelProvider, StubProvider};
pub use schema::{DatabaseSnapshot, SchemaCache, SchemaIntrospector};
pub use types::{Action, ActionOptions, ExecutionResult, TranslateRequest, Translation};
pub use validate::{ActionValidator, ValidationReport};
