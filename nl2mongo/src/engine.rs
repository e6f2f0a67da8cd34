//! Pipeline facade.
//!
//! `QueryEngine` wires introspection, prompt construction, the provider
//! chain, normalization, validation and execution into the two calls
//! consumers make: `translate` and `execute`. Translation never mutates
//! anything; callers decide what to do with a destructive action before
//! handing it to `execute`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::db::{ConnectionDescriptor, DatabaseConnector};
use crate::error::EngineError;
use crate::execute::Executor;
use crate::normalize::ResponseNormalizer;
use crate::prompt::ContextComposer;
use crate::provider::ModelOrchestrator;
use crate::schema::{SchemaCache, SchemaIntrospector};
use crate::types::{Action, ExecutionResult, TranslateRequest, Translation};
use crate::validate::ActionValidator;

pub struct QueryEngine {
    config: EngineConfig,
    connector: Arc<dyn DatabaseConnector>,
    orchestrator: ModelOrchestrator,
    introspector: SchemaIntrospector,
    cache: SchemaCache,
    executor: Executor,
}

impl QueryEngine {
    /// Builds an engine from configuration, instantiating the provider chain
    /// it names.
    pub fn new(
        config: EngineConfig,
        connector: Arc<dyn DatabaseConnector>,
    ) -> Result<Self, EngineError> {
        let orchestrator =
            ModelOrchestrator::from_configs(&config.providers, config.retry.clone())?;
        Self::with_orchestrator(config, connector, orchestrator)
    }

    /// Builds an engine around an already-assembled provider chain. This is
    /// the seam tests use to inject scripted providers.
    pub fn with_orchestrator(
        config: EngineConfig,
        connector: Arc<dyn DatabaseConnector>,
        orchestrator: ModelOrchestrator,
    ) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|errors| EngineError::Config(errors.join("; ")))?;

        // A disabled cache is a zero-TTL cache: every lookup misses.
        let ttl = if config.cache.enabled {
            Duration::from_secs(config.cache.ttl_seconds)
        } else {
            Duration::ZERO
        };

        Ok(Self {
            introspector: SchemaIntrospector::new(config.sample_size),
            cache: SchemaCache::new(ttl),
            executor: Executor::new(Arc::clone(&connector)),
            config,
            connector,
            orchestrator,
        })
    }

    /// Natural language in, validated (but unexecuted) action out.
    pub async fn translate(&self, request: &TranslateRequest) -> Result<Translation, EngineError> {
        let snapshot = self
            .introspector
            .cached(
                self.connector.as_ref(),
                &request.descriptor,
                &self.cache,
                request.force_schema_refresh,
            )
            .await?;
        let schema_used = !snapshot.is_empty();

        let preview_limit = request.preview_limit.unwrap_or(self.config.preview_limit);
        let prompt = ContextComposer::compose(Some(&snapshot), &request.user_text, preview_limit);
        debug!(
            target = %request.descriptor.redacted(),
            prompt_len = prompt.len(),
            schema_used,
            "prompt composed"
        );

        let raw = self.orchestrator.generate(&prompt).await?;
        let action = ResponseNormalizer::normalize(&raw, preview_limit)?;

        let warnings = ActionValidator::validate(&action, Some(&snapshot)).into_result()?;
        for warning in &warnings {
            warn!(
                action = action.verb(),
                collection = action.collection(),
                warning, "validation warning"
            );
        }

        Ok(Translation {
            action,
            schema_used,
            warnings,
        })
    }

    /// Runs a translated action. The executor re-checks write scope on its
    /// own, so even a hand-built action cannot wipe a collection here.
    pub async fn execute(
        &self,
        action: &Action,
        descriptor: &ConnectionDescriptor,
    ) -> Result<ExecutionResult, EngineError> {
        self.executor.execute(action, descriptor).await
    }

    /// Drops every cached schema snapshot.
    pub fn invalidate_schema_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, RetryConfig};
    use crate::db::MemoryConnector;
    use crate::error::ProviderError;
    use crate::provider::StubProvider;
    use mongodb::bson::doc;

    fn seeded_connector() -> MemoryConnector {
        let connector = MemoryConnector::new();
        connector.seed(
            "users",
            vec![
                doc! { "_id": 1, "name": "Ada", "age": 36 },
                doc! { "_id": 2, "name": "Grace", "age": 45 },
            ],
        );
        connector
    }

    fn engine_with(stubs: Vec<StubProvider>, connector: MemoryConnector) -> QueryEngine {
        let config = EngineConfig {
            providers: vec![ProviderConfig::stub("stub-model")],
            retry: RetryConfig {
                max_attempts: 3,
                backoff_ms: 1,
            },
            ..EngineConfig::default()
        };
        let providers = stubs
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn crate::provider::ModelProvider>)
            .collect();
        let orchestrator = ModelOrchestrator::new(providers, config.retry.clone());
        QueryEngine::with_orchestrator(config, Arc::new(connector), orchestrator).unwrap()
    }

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new("memory://test", "shop")
    }

    #[tokio::test]
    async fn find_all_users_translates_with_defaults() {
        let stub =
            StubProvider::named("stub").respond_with(r#"{"action":"find","collection":"users","query":{}}"#);
        let prompts = stub.prompts_handle();
        let engine = engine_with(vec![stub], seeded_connector());

        let translation = engine
            .translate(&TranslateRequest::new("Find all users", descriptor()))
            .await
            .unwrap();

        assert_eq!(translation.action.verb(), "find");
        assert_eq!(translation.action.collection(), "users");
        assert_eq!(translation.action.options().limit, Some(50));
        assert!(translation.schema_used);
        assert!(translation.warnings.is_empty());

        // The prompt carried the live schema and ended with the user's text.
        let prompts = prompts.lock().unwrap();
        assert!(prompts[0].contains("Collection \"users\""));
        assert!(prompts[0].trim_end().ends_with("Find all users"));
    }

    #[tokio::test]
    async fn collection_wide_delete_is_rejected_at_translation() {
        let stub = StubProvider::named("stub")
            .respond_with(r#"{"action":"delete","collection":"users","query":{}}"#);
        let engine = engine_with(vec![stub], seeded_connector());

        let err = engine
            .translate(&TranslateRequest::new(
                "Delete everything in users",
                descriptor(),
            ))
            .await
            .unwrap_err();
        match err {
            EngineError::Validation { errors } => {
                assert!(errors[0].starts_with("BLOCKED"), "errors: {errors:?}")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn delete_missing_its_query_is_blocked_not_malformed() {
        // A filter-less delete is a scope problem, not a parse problem: the
        // caller should get a resubmittable validation error.
        let stub = StubProvider::named("stub")
            .respond_with(r#"{"action":"delete","collection":"users"}"#);
        let engine = engine_with(vec![stub], seeded_connector());

        let err = engine
            .translate(&TranslateRequest::new("delete all users", descriptor()))
            .await
            .unwrap_err();
        match err {
            EngineError::Validation { errors } => {
                assert!(errors[0].starts_with("BLOCKED"), "errors: {errors:?}")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn fenced_completion_with_trailing_comma_translates() {
        let stub = StubProvider::named("stub").respond_with(
            "```json\n{\"action\": \"find\", \"collection\": \"users\", \"query\": {\"age\": {\"$gte\": 40},}}\n```",
        );
        let engine = engine_with(vec![stub], seeded_connector());

        let translation = engine
            .translate(&TranslateRequest::new("users 40 or older", descriptor()))
            .await
            .unwrap();
        assert_eq!(translation.action.verb(), "find");

        let result = engine
            .execute(&translation.action, &descriptor())
            .await
            .unwrap();
        match result {
            ExecutionResult::Documents { documents, .. } => {
                assert_eq!(documents.len(), 1);
                assert_eq!(documents[0].get_str("name").unwrap(), "Grace");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limited_primary_recovers_without_falling_through() {
        let primary = StubProvider::named("primary")
            .fail_with(ProviderError::RateLimited("quota".into()))
            .fail_with(ProviderError::RateLimited("quota".into()))
            .respond_with(r#"{"action":"find","collection":"users","query":{}}"#);
        let calls = primary.call_count_handle();
        let secondary = StubProvider::named("secondary")
            .respond_with(r#"{"action":"find","collection":"wrong","query":{}}"#);

        let engine = engine_with(vec![primary, secondary], seeded_connector());
        let translation = engine
            .translate(&TranslateRequest::new("Find all users", descriptor()))
            .await
            .unwrap();

        assert_eq!(translation.action.collection(), "users");
        assert_eq!(calls(), 3);
    }

    #[tokio::test]
    async fn unknown_field_surfaces_as_warning() {
        let stub = StubProvider::named("stub").respond_with(
            r#"{"action":"find","collection":"users","query":{"salary":{"$gt":100}}}"#,
        );
        let engine = engine_with(vec![stub], seeded_connector());

        let translation = engine
            .translate(&TranslateRequest::new("high earners", descriptor()))
            .await
            .unwrap();
        assert!(translation
            .warnings
            .iter()
            .any(|w| w.contains("'salary'")));
    }

    #[tokio::test]
    async fn per_request_preview_limit_overrides_config() {
        let stub = StubProvider::named("stub")
            .respond_with(r#"{"action":"find","collection":"users","query":{}}"#);
        let engine = engine_with(vec![stub], seeded_connector());

        let mut request = TranslateRequest::new("Find all users", descriptor());
        request.preview_limit = Some(5);
        let translation = engine.translate(&request).await.unwrap();
        assert_eq!(translation.action.options().limit, Some(5));
    }

    #[tokio::test]
    async fn empty_database_translates_without_schema() {
        let stub = StubProvider::named("stub")
            .respond_with(r#"{"action":"find","collection":"users","query":{}}"#);
        let engine = engine_with(vec![stub], MemoryConnector::new());

        let translation = engine
            .translate(&TranslateRequest::new("Find all users", descriptor()))
            .await
            .unwrap();
        assert!(!translation.schema_used);
    }

    #[tokio::test]
    async fn garbage_completion_is_a_malformed_response() {
        let stub = StubProvider::named("stub").respond_with("I'd be happy to help!");
        let engine = engine_with(vec![stub], seeded_connector());

        let err = engine
            .translate(&TranslateRequest::new("Find all users", descriptor()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedResponse { .. }));
    }
}
