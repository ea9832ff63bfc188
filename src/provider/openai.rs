//! Remote provider for OpenAI-compatible APIs.

use async_trait::async_trait;
use serde_json::json;

use super::{parse_vector, post_json, required, LanguageModel, Transport};
use crate::config::OpenAiSettings;
use crate::error::ProviderError;

/// Calls `POST {api_endpoint}/chat/completions` and
/// `POST {api_endpoint}/embeddings` with bearer authentication.
pub struct OpenAiProvider {
    endpoint: String,
    model: String,
    embedding_model: String,
    api_key: String,
    transport: Transport,
}

impl OpenAiProvider {
    /// # Errors
    ///
    /// [`ProviderError::Config`] if a model, the endpoint or `openai.api_key`
    /// is blank. The key comes from the configuration only.
    pub(crate) fn new(settings: &OpenAiSettings, transport: Transport) -> Result<Self, ProviderError> {
        let api_key = resolve_api_key(settings.api_key.as_deref())?;
        let endpoint = required(&settings.api_endpoint, "openai.api_endpoint")?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: required(&settings.model, "openai.model")?,
            embedding_model: required(&settings.embedding_model, "openai.embedding_model")?,
            api_key,
            transport,
        })
    }
}

/// Blank counts as missing.
pub(crate) fn resolve_api_key(configured: Option<&str>) -> Result<String, ProviderError> {
    configured
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ProviderError::Config(
                "'openai.api_key' must be set; run `magic-cli config set --key openai.api_key --value <key>`"
                    .to_string(),
            )
        })
}

#[async_trait]
impl LanguageModel for OpenAiProvider {
    fn fingerprint(&self) -> String {
        format!("openai:{}", self.embedding_model)
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });
        let url = format!("{}/chat/completions", self.endpoint);
        let json = post_json(&self.transport, "OpenAI", &url, Some(&self.api_key), &body).await?;
        parse_chat_response(&json)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = json!({
            "model": self.embedding_model,
            "input": text,
        });
        let url = format!("{}/embeddings", self.endpoint);
        let json = post_json(&self.transport, "OpenAI", &url, Some(&self.api_key), &body).await?;
        parse_embedding_response(&json)
    }
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, ProviderError> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.pointer("/message/content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            ProviderError::Response("Invalid OpenAI response: missing message content".to_string())
        })?;
    if content.trim().is_empty() {
        return Err(ProviderError::Response("OpenAI returned an empty completion".to_string()));
    }
    Ok(content.to_string())
}

/// Extract `data[0].embedding`.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>, ProviderError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|d| d.get("embedding"))
        .ok_or_else(|| {
            ProviderError::Response("Invalid OpenAI response: missing embedding".to_string())
        })?;
    parse_vector(embedding, "OpenAI")
}
