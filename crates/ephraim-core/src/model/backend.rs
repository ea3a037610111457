//! Chat backend abstraction and the Ollama implementation.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

use anyhow::{anyhow, Context, Result};

use crate::config::ModelConfig;
use crate::model::ChatMessage;

/// The chat interface the orchestrator drives. Implementations own all
/// provider detail; the core only sees message lists and content text.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// One blocking chat completion; returns the full content text.
    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;

    /// Streaming completion: a channel of content fragments, closed on
    /// completion or error.
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<mpsc::UnboundedReceiver<Result<String>>>;

    /// Cheap availability probe used at boot.
    async fn is_available(&self) -> bool;
}

/// Backend for a local Ollama server (`/api/chat`).
pub struct OllamaBackend {
    client: reqwest::Client,
    endpoint: String,
    temperature: f32,
    max_tokens: u32,
}

impl OllamaBackend {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn request_body(&self, model: &str, messages: &[ChatMessage], stream: bool) -> Value {
        json!({
            "model": model,
            "messages": messages,
            "stream": stream,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.endpoint)
    }
}

fn content_of(chunk: &Value) -> Option<String> {
    chunk
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .map(String::from)
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let response = self
            .client
            .post(self.chat_url())
            .json(&self.request_body(model, messages, false))
            .send()
            .await
            .context("model backend unreachable")?
            .error_for_status()
            .context("model backend returned an error status")?;

        let value: Value = response.json().await.context("reading model response")?;
        content_of(&value).ok_or_else(|| anyhow!("model response had no message content"))
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<mpsc::UnboundedReceiver<Result<String>>> {
        let response = self
            .client
            .post(self.chat_url())
            .json(&self.request_body(model, messages, true))
            .send()
            .await
            .context("model backend unreachable")?
            .error_for_status()
            .context("model backend returned an error status")?;

        let (tx, rx) = mpsc::unbounded_channel();

        // Chunks are newline-delimited JSON objects; a chunk may split a
        // line, so buffer across reads.
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(anyhow!("stream error: {e}")));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(line) {
                        Ok(value) => {
                            if let Some(content) = content_of(&value) {
                                if !content.is_empty() && tx.send(Ok(content)).is_err() {
                                    return;
                                }
                            }
                            if value.get("done").and_then(Value::as_bool) == Some(true) {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(anyhow!("bad stream frame: {e}")));
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.endpoint))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
