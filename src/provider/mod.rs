//! Language-model providers.
//!
//! Two backends sit behind the [`LanguageModel`] capability trait:
//! - **[`OllamaProvider`]** (`general.llm = "ollama"`, [`ProviderKind::Local`]): a local
//!   Ollama server's `/api/generate` and `/api/embed` endpoints.
//! - **[`OpenAiProvider`]** (`general.llm = "openai"`, [`ProviderKind::Remote`]): an
//!   OpenAI-compatible `/chat/completions` and `/embeddings` API.
//!
//! [`Provider::from_settings`] picks the active variant and validates its
//! sub-keys before anything touches the network, so a misconfigured
//! provider fails with [`ProviderError::Config`] and no side effects.
//!
//! # Retry Strategy
//!
//! Both backends share [`post_json`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Once retries are exhausted the last error surfaces as
//! [`ProviderError::Transport`].

mod ollama;
mod openai;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::Settings;
use crate::error::ProviderError;

/// Which family of backend is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ProviderKind {
    /// A model served on this machine.
    #[serde(rename = "ollama")]
    Local,
    /// A hosted API reached with a credential.
    #[serde(rename = "openai")]
    Remote,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Local => "ollama",
            ProviderKind::Remote => "openai",
        }
    }
}

/// Completion and embedding capabilities shared by every backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Identifies the embedding space, e.g. `"openai:text-embedding-ada-002"`.
    /// Vectors with different fingerprints must never be compared.
    fn fingerprint(&self) -> String;

    /// Generate a text completion for `prompt` under the `system` instruction.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// The active provider, selected by `general.llm`.
pub enum Provider {
    Ollama(OllamaProvider),
    OpenAi(OpenAiProvider),
}

impl Provider {
    /// Build the provider named by `general.llm`, validating its sub-keys.
    pub fn from_settings(settings: &Settings) -> Result<Self, ProviderError> {
        let transport = Transport::from_settings(settings)?;
        let provider = match settings.general.llm {
            ProviderKind::Local => Provider::Ollama(OllamaProvider::new(&settings.ollama, transport)?),
            ProviderKind::Remote => {
                Provider::OpenAi(OpenAiProvider::new(&settings.openai, transport)?)
            }
        };
        tracing::debug!(
            provider = provider.kind().name(),
            fingerprint = %provider.fingerprint(),
            "provider selected"
        );
        Ok(provider)
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::Ollama(_) => ProviderKind::Local,
            Provider::OpenAi(_) => ProviderKind::Remote,
        }
    }
}

#[async_trait]
impl LanguageModel for Provider {
    fn fingerprint(&self) -> String {
        match self {
            Provider::Ollama(p) => p.fingerprint(),
            Provider::OpenAi(p) => p.fingerprint(),
        }
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        match self {
            Provider::Ollama(p) => p.complete(system, prompt).await,
            Provider::OpenAi(p) => p.complete(system, prompt).await,
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        match self {
            Provider::Ollama(p) => p.embed(text).await,
            Provider::OpenAi(p) => p.embed(text).await,
        }
    }
}

/// Return the trimmed value, or a config error naming `key`.
pub(crate) fn required(value: &str, key: &str) -> Result<String, ProviderError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ProviderError::Config(format!("'{}' must be set", key)));
    }
    Ok(value.to_string())
}

/// HTTP client plus the retry policy from `general.*`.
#[derive(Clone)]
pub(crate) struct Transport {
    client: reqwest::Client,
    max_retries: u32,
}

impl Transport {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.general.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_retries: settings.general.max_retries,
        })
    }
}

/// POST `body` as JSON to `url` and return the decoded JSON response.
///
/// `label` names the backend in error messages.
pub(crate) async fn post_json(
    transport: &Transport,
    label: &str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value, ProviderError> {
    let mut last_err = None;

    for attempt in 0..=transport.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(label, attempt, ?delay, "retrying provider request");
            tokio::time::sleep(delay).await;
        }

        let mut request = transport
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let text = response.text().await.map_err(|e| {
                        ProviderError::Transport(format!("{} response body: {}", label, e))
                    })?;
                    return serde_json::from_str(&text).map_err(|e| {
                        ProviderError::Response(format!("{} returned invalid JSON: {}", label, e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = ProviderError::Transport(format!(
                    "{} API error {}: {}",
                    label,
                    status,
                    body_text.trim()
                ));

                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                let what = if e.is_timeout() { "timed out" } else { "failed" };
                last_err = Some(ProviderError::Transport(format!(
                    "{} request to {} {}: {}",
                    label, url, what, e
                )));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| ProviderError::Transport(format!("{} failed after retries", label))))
}

/// Convert a JSON array of numbers into an embedding vector.
pub(crate) fn parse_vector(value: &serde_json::Value, label: &str) -> Result<Vec<f32>, ProviderError> {
    let items = value.as_array().ok_or_else(|| {
        ProviderError::Response(format!("{} embedding is not an array", label))
    })?;
    let vector = items
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| ProviderError::Response(format!("{} embedding has non-numeric values", label)))?;
    if vector.is_empty() {
        return Err(ProviderError::Response(format!("{} returned an empty embedding", label)));
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use tempfile::TempDir;

    fn settings(json: &str) -> (TempDir, Settings) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, json).unwrap();
        let settings = ConfigStore::load(&path).unwrap().settings().unwrap();
        (tmp, settings)
    }

    #[test]
    fn test_default_selects_local() {
        let (_tmp, s) = settings("{}");
        let provider = Provider::from_settings(&s).unwrap();
        assert_eq!(provider.kind(), ProviderKind::Local);
        assert_eq!(provider.fingerprint(), "ollama:nomic-embed-text:latest");
    }

    #[test]
    fn test_remote_with_key() {
        let (_tmp, s) = settings(
            r#"{"general": {"llm": "openai"}, "openai": {"api_key": "sk-test"}}"#,
        );
        let provider = Provider::from_settings(&s).unwrap();
        assert_eq!(provider.kind(), ProviderKind::Remote);
        assert_eq!(provider.fingerprint(), "openai:text-embedding-ada-002");
    }

    #[test]
    fn test_parse_vector() {
        let v = parse_vector(&serde_json::json!([0.5, -1, 2.25]), "test").unwrap();
        assert_eq!(v, vec![0.5, -1.0, 2.25]);
        assert!(matches!(
            parse_vector(&serde_json::json!([]), "test"),
            Err(ProviderError::Response(_))
        ));
        assert!(matches!(
            parse_vector(&serde_json::json!(["a"]), "test"),
            Err(ProviderError::Response(_))
        ));
        assert!(matches!(
            parse_vector(&serde_json::json!({"x": 1}), "test"),
            Err(ProviderError::Response(_))
        ));
    }

    #[test]
    fn test_required() {
        assert_eq!(required(" llama3 ", "ollama.model").unwrap(), "llama3");
        let err = required("", "ollama.model").unwrap_err();
        assert!(err.to_string().contains("ollama.model"));
    }
}
