//! Local provider backed by an Ollama server.

use async_trait::async_trait;
use serde_json::json;

use super::{parse_vector, post_json, required, LanguageModel, Transport};
use crate::config::OllamaSettings;
use crate::error::ProviderError;

/// Calls `POST /api/generate` and `POST /api/embed` on `ollama.base_url`.
/// Requires Ollama to be running with both models pulled.
pub struct OllamaProvider {
    base_url: String,
    model: String,
    embedding_model: String,
    transport: Transport,
}

impl OllamaProvider {
    pub(crate) fn new(settings: &OllamaSettings, transport: Transport) -> Result<Self, ProviderError> {
        let base_url = required(&settings.base_url, "ollama.base_url")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: required(&settings.model, "ollama.model")?,
            embedding_model: required(&settings.embedding_model, "ollama.embedding_model")?,
            transport,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaProvider {
    fn fingerprint(&self) -> String {
        format!("ollama:{}", self.embedding_model)
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "system": system,
            "stream": false,
        });
        let url = format!("{}/api/generate", self.base_url);
        let json = post_json(&self.transport, "Ollama", &url, None, &body).await?;
        parse_generate_response(&json)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = json!({
            "model": self.embedding_model,
            "input": text,
        });
        let url = format!("{}/api/embed", self.base_url);
        let json = post_json(&self.transport, "Ollama", &url, None, &body).await?;
        parse_embed_response(&json)
    }
}

fn parse_generate_response(json: &serde_json::Value) -> Result<String, ProviderError> {
    let text = json
        .get("response")
        .and_then(|r| r.as_str())
        .ok_or_else(|| ProviderError::Response("Ollama response missing 'response'".to_string()))?;
    if text.trim().is_empty() {
        return Err(ProviderError::Response("Ollama returned an empty completion".to_string()));
    }
    Ok(text.to_string())
}

fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<f32>, ProviderError> {
    let first = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .ok_or_else(|| {
            ProviderError::Response("Ollama response missing 'embeddings'".to_string())
        })?;
    parse_vector(first, "Ollama")
}
