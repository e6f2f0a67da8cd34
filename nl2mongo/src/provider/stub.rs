//! Scriptable in-process provider for tests and offline runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::ProviderError;

use super::ModelProvider;

/// Replays a scripted sequence of completions and failures, in order. Once
/// the script runs out, further calls fail as unavailable. Records every
/// prompt it was handed and counts calls so tests can assert on chain
/// behavior.
pub struct StubProvider {
    name: String,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
}

impl StubProvider {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            prompts: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A stub with no script; every call fails as unavailable.
    pub fn empty() -> Self {
        Self::named("stub")
    }

    /// Queues a successful completion.
    pub fn respond_with(self, text: &str) -> Self {
        self.script
            .lock()
            .expect("stub script poisoned")
            .push_back(Ok(text.to_string()));
        self
    }

    /// Queues a failure.
    pub fn fail_with(self, err: ProviderError) -> Self {
        self.script
            .lock()
            .expect("stub script poisoned")
            .push_back(Err(err));
        self
    }

    /// Handle that reads the call count after the stub has been boxed away.
    pub fn call_count_handle(&self) -> impl Fn() -> usize {
        let calls = Arc::clone(&self.calls);
        move || calls.load(Ordering::SeqCst)
    }

    /// Shared view of every prompt this stub has received.
    pub fn prompts_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.prompts)
    }
}

#[async_trait]
impl ModelProvider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("stub prompts poisoned")
            .push(prompt.to_string());
        self.script
            .lock()
            .expect("stub script poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Unavailable("stub script exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_replays_in_order_then_exhausts() {
        let stub = StubProvider::named("s")
            .respond_with("one")
            .fail_with(ProviderError::EmptyCompletion)
            .respond_with("two");

        assert_eq!(stub.generate("a").await.unwrap(), "one");
        assert!(matches!(
            stub.generate("b").await,
            Err(ProviderError::EmptyCompletion)
        ));
        assert_eq!(stub.generate("c").await.unwrap(), "two");
        assert!(matches!(
            stub.generate("d").await,
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn prompts_are_recorded() {
        let stub = StubProvider::named("s").respond_with("ok");
        let prompts = stub.prompts_handle();
        stub.generate("hello").await.unwrap();
        assert_eq!(prompts.lock().unwrap().as_slice(), &["hello".to_string()]);
    }
}
