//! LLM completion backends.
//!
//! One small seam: `complete(prompt) -> text`. Each configured role gets a
//! backend selected at config-load time from the provider named in the
//! environment; the graph nodes only ever see the `CompletionBackend` trait,
//! which is also what the tests script against.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use crate::settings::{LlmEndpoint, LlmProvider, LlmRole, Settings};

/// The completion seam every LLM-touching node goes through.
pub trait CompletionBackend: Send + Sync {
    fn complete<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, String>>;
    /// Short label for log lines.
    fn describe(&self) -> String;
}

/// HTTP client for one configured endpoint.
pub struct HttpLlmClient {
    endpoint: LlmEndpoint,
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(endpoint: LlmEndpoint, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self { endpoint, client })
    }

    fn request_body(&self, prompt: &str) -> Value {
        // Ollama's native chat endpoint and the OpenAI-compatible endpoints
        // (OpenAI, DeepSeek, Qwen, LM Studio, GigaChat) take the same
        // messages array; they differ in where the reply text lands.
        json!({
            "model": self.endpoint.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false
        })
    }

    fn extract_text(&self, reply: &Value) -> Result<String, String> {
        let text = match self.endpoint.provider {
            LlmProvider::Ollama => reply
                .pointer("/message/content")
                .and_then(Value::as_str),
            _ => reply
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str),
        };
        text.map(str::to_string).ok_or_else(|| {
            format!(
                "Unexpected completion reply shape from {}",
                self.describe()
            )
        })
    }
}

impl CompletionBackend for HttpLlmClient {
    fn complete<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, String>> {
        Box::pin(async move {
            let url = self.endpoint.url();
            let response = self
                .client
                .post(&url)
                .json(&self.request_body(prompt))
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        format!("LLM call to {} timed out", url)
                    } else {
                        format!("LLM call to {} failed: {}", url, e)
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(format!("LLM call to {} returned {}: {}", url, status, body));
            }

            let reply: Value = response
                .json()
                .await
                .map_err(|e| format!("LLM reply from {} is not JSON: {}", url, e))?;
            self.extract_text(&reply)
        })
    }

    fn describe(&self) -> String {
        format!("{:?} model {}", self.endpoint.provider, self.endpoint.model)
    }
}

/// Role-indexed backends, shared across requests.
#[derive(Clone)]
pub struct LlmRouter {
    backends: HashMap<LlmRole, Arc<dyn CompletionBackend>>,
}

impl LlmRouter {
    /// Build HTTP backends for every role from the settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, String> {
        let timeout = Duration::from_secs(settings.llm_timeout_secs);
        let mut backends: HashMap<LlmRole, Arc<dyn CompletionBackend>> = HashMap::new();
        for role in LlmRole::ALL {
            let client = HttpLlmClient::new(settings.llm_endpoint(*role).clone(), timeout)?;
            backends.insert(*role, Arc::new(client));
        }
        Ok(Self { backends })
    }

    /// Empty router; populate with `with_backend`. Used by tests.
    pub fn empty() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    pub fn with_backend(mut self, role: LlmRole, backend: Arc<dyn CompletionBackend>) -> Self {
        self.backends.insert(role, backend);
        self
    }

    /// Complete a prompt with the backend for `role`, falling back to the
    /// DEFAULT role's backend when the role has none.
    pub async fn complete(&self, role: LlmRole, prompt: &str) -> Result<String, String> {
        let backend = self
            .backends
            .get(&role)
            .or_else(|| self.backends.get(&LlmRole::Default))
            .ok_or_else(|| format!("No LLM backend configured for role {:?}", role))?;

        let started = std::time::Instant::now();
        let result = backend.complete(prompt).await;
        match &result {
            Ok(text) => println!(
                "[Llm] {:?} completion via {} in {:.2}s ({} chars)",
                role,
                backend.describe(),
                started.elapsed().as_secs_f64(),
                text.len()
            ),
            Err(e) => println!(
                "[Llm] {:?} completion via {} failed in {:.2}s: {}",
                role,
                backend.describe(),
                started.elapsed().as_secs_f64(),
                e
            ),
        }
        result
    }

    pub fn has_backend(&self, role: LlmRole) -> bool {
        self.backends.contains_key(&role)
    }
}
