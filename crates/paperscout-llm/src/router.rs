//! LLM router — tries registered backends in priority order.
//!
//! The router itself implements `LlmBackend`, so callers hold a single
//! `Arc<dyn LlmBackend>` whether one or several backends are configured.

use std::sync::Arc;
use async_trait::async_trait;
use crate::backend::{LlmBackend, LlmError, LlmRequest, LlmResponse};

/// Routing policy controlling backend order.
#[derive(Debug, Clone, Default)]
pub struct RoutingPolicy {
    /// If true, remote backends are skipped entirely.
    pub local_only_mode: bool,
    /// Backend name that gets first pick for completions.
    pub default_backend: Option<String>,
    /// Backend name used for embeddings (falls back to the completion order).
    pub embedding_backend: Option<String>,
}

/// Routes LLM requests to the first backend that answers.
pub struct LlmRouter {
    backends: Vec<(String, Arc<dyn LlmBackend>)>,
    policy: RoutingPolicy,
}

impl LlmRouter {
    pub fn new(policy: RoutingPolicy) -> Self {
        Self { backends: Vec::new(), policy }
    }

    pub fn register_backend(&mut self, name: impl Into<String>, backend: Arc<dyn LlmBackend>) {
        self.backends.push((name.into(), backend));
    }

    pub fn registered_backends(&self) -> Vec<&str> {
        self.backends.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Backends in the order they should be tried; `preferred` goes first.
    fn ordered(&self, preferred: Option<&str>) -> Vec<&(String, Arc<dyn LlmBackend>)> {
        let mut out: Vec<_> = self.backends.iter()
            .filter(|(_, b)| !self.policy.local_only_mode || b.is_local())
            .collect();
        if let Some(name) = preferred {
            if let Some(pos) = out.iter().position(|(n, _)| n == name) {
                let first = out.remove(pos);
                out.insert(0, first);
            }
        }
        out
    }
}

#[async_trait]
impl LlmBackend for LlmRouter {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut last_err = LlmError::Unavailable("no LLM backend configured".to_string());
        for (name, backend) in self.ordered(self.policy.default_backend.as_deref()) {
            match backend.complete(req.clone()).await {
                Ok(resp) => {
                    tracing::debug!(backend = %name, model = backend.model_id(), "LLM request routed");
                    return Ok(resp);
                }
                Err(e) => {
                    tracing::warn!(backend = %name, error = %e, "LLM backend failed, trying next");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, LlmError> {
        let preferred = self.policy.embedding_backend.as_deref()
            .or(self.policy.default_backend.as_deref());
        let mut last_err = LlmError::Unavailable("no embedding backend configured".to_string());
        for (name, backend) in self.ordered(preferred) {
            match backend.embed(texts.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    tracing::warn!(backend = %name, error = %e, "embedding backend failed, trying next");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn model_id(&self) -> &str {
        self.ordered(self.policy.default_backend.as_deref())
            .first()
            .map(|(_, b)| b.model_id())
            .unwrap_or("none")
    }

    fn is_local(&self) -> bool {
        self.backends.iter().all(|(_, b)| b.is_local())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        model: &'static str,
        local: bool,
        fail: bool,
    }

    #[async_trait]
    impl LlmBackend for Fixed {
        async fn complete(&self, _req: LlmRequest) -> Result<LlmResponse, LlmError> {
            if self.fail {
                return Err(LlmError::Unavailable(self.model.to_string()));
            }
            Ok(LlmResponse {
                content: self.model.to_string(),
                model: self.model.to_string(),
                prompt_tokens: 0,
                completion_tokens: 0,
            })
        }
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, LlmError> {
            if self.fail {
                return Err(LlmError::Unavailable(self.model.to_string()));
            }
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
        fn model_id(&self) -> &str { self.model }
        fn is_local(&self) -> bool { self.local }
    }

    fn fixed(model: &'static str, local: bool, fail: bool) -> Arc<dyn LlmBackend> {
        Arc::new(Fixed { model, local, fail })
    }

    #[tokio::test]
    async fn test_falls_through_to_next_backend() {
        let mut r = LlmRouter::new(RoutingPolicy::default());
        r.register_backend("gemini", fixed("gemini", false, true));
        r.register_backend("ollama", fixed("ollama", true, false));
        let resp = r.complete(LlmRequest::prompt("s", "u")).await.unwrap();
        assert_eq!(resp.content, "ollama");
    }

    #[tokio::test]
    async fn test_default_backend_goes_first() {
        let mut r = LlmRouter::new(RoutingPolicy {
            default_backend: Some("b".to_string()),
            ..Default::default()
        });
        r.register_backend("a", fixed("a", false, false));
        r.register_backend("b", fixed("b", false, false));
        assert_eq!(r.complete(LlmRequest::default()).await.unwrap().content, "b");
        assert_eq!(r.model_id(), "b");
    }

    #[tokio::test]
    async fn test_local_only_skips_remote() {
        let mut r = LlmRouter::new(RoutingPolicy { local_only_mode: true, ..Default::default() });
        r.register_backend("openai", fixed("openai", false, false));
        let err = r.complete(LlmRequest::default()).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_all_failing_returns_last_error() {
        let mut r = LlmRouter::new(RoutingPolicy::default());
        r.register_backend("x", fixed("x", true, true));
        r.register_backend("y", fixed("y", true, true));
        match r.embed(vec!["t".into()]).await {
            Err(LlmError::Unavailable(m)) => assert_eq!(m, "y"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
