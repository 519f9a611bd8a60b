//! Conversation backend boundary.
//!
//! The engine treats the AI backend as an external collaborator with exactly
//! two operations: open a session, and stream one reply via a per-fragment
//! callback. Both are fallible and latency-bearing; there is no retry logic
//! at this boundary — a failure surfaces as a single error.
//!
//! `GeminiProvider` is the production implementation, speaking the
//! `streamGenerateContent` SSE protocol. The conversation history is held
//! client-side in the session handle and replayed on every send.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use thiserror::Error;

use crate::config::ProviderConfig;

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("stream failure: {0}")]
    StreamFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

/// One completed conversation turn as the backend sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

/// Opaque session handle. The backend is stateless between calls, so the
/// handle carries the system prompt and the full turn history.
#[derive(Debug, Clone, Default)]
pub struct ProviderSession {
    pub system_prompt: String,
    pub history: Vec<Turn>,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn create_session(&self, system_prompt: &str) -> ProviderSession;

    /// Streams one reply. `on_fragment` fires zero or more times with
    /// incremental text before completion. On success the prompt and the
    /// assembled reply are appended to the session history and the full
    /// reply is returned; on failure the history is left untouched.
    async fn stream_send(
        &self,
        session: &mut ProviderSession,
        prompt: &str,
        on_fragment: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, ProviderError>;
}

// ─── Wire format ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    role: TurnRole,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: SystemInstruction<'a>,
    generation_config: GenerationConfig,
    contents: Vec<Content<'a>>,
}

// ─── SSE plumbing ─────────────────────────────────────────────────────────────

/// Reassembles complete lines out of arbitrary byte chunks; a line may span
/// several chunks, and one chunk may carry several lines. Bytes are buffered
/// raw so a multi-byte character split across chunks decodes intact once its
/// line completes.
#[derive(Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(
                String::from_utf8_lossy(&line)
                    .trim_end_matches(['\n', '\r'])
                    .to_string(),
            );
        }
        lines
    }
}

/// Pulls the concatenated candidate text out of one SSE event payload.
/// Events without text (safety metadata, usage stats) yield nothing.
fn extract_text(payload: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(payload).ok()?;
    let parts = v
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    (!text.is_empty()).then_some(text)
}

// ─── GeminiProvider ───────────────────────────────────────────────────────────

pub struct GeminiProvider {
    http: reqwest::Client,
    api_base_url: String,
    model: String,
    temperature: f64,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
        }
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.api_base_url, self.model
        )
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn create_session(&self, system_prompt: &str) -> ProviderSession {
        ProviderSession {
            system_prompt: system_prompt.to_string(),
            history: Vec::new(),
        }
    }

    async fn stream_send(
        &self,
        session: &mut ProviderSession,
        prompt: &str,
        on_fragment: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, ProviderError> {
        let mut contents: Vec<Content> = session
            .history
            .iter()
            .map(|t| Content {
                role: t.role,
                parts: vec![Part { text: &t.text }],
            })
            .collect();
        contents.push(Content {
            role: TurnRole::User,
            parts: vec![Part { text: prompt }],
        });

        let body = GenerateRequest {
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: &session.system_prompt,
                }],
            },
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
            contents,
        };

        let response = self
            .http
            .post(self.stream_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::StreamFailure(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::StreamFailure(e.to_string()))?;

        let mut stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::default();
        let mut reply = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProviderError::StreamFailure(e.to_string()))?;
            for line in buffer.push(&chunk) {
                if let Some(payload) = line.strip_prefix("data: ") {
                    if let Some(text) = extract_text(payload) {
                        reply.push_str(&text);
                        on_fragment(&text);
                    }
                }
            }
        }

        session.history.push(Turn {
            role: TurnRole::User,
            text: prompt.to_string(),
        });
        session.history.push(Turn {
            role: TurnRole::Model,
            text: reply.clone(),
        });
        Ok(reply)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_handles_split_and_joined_lines() {
        let mut buf = SseLineBuffer::default();
        assert!(buf.push(b"data: par").is_empty());
        assert_eq!(buf.push(b"tial\r\ndata: whole\n"), ["data: partial", "data: whole"]);
        assert!(buf.push(b"tail-without-newline").is_empty());
    }

    #[test]
    fn line_buffer_keeps_split_multibyte_chars_intact() {
        let mut buf = SseLineBuffer::default();
        let bytes = "café\n".as_bytes();
        // Split in the middle of the two-byte 'é'.
        assert!(buf.push(&bytes[..4]).is_empty());
        assert_eq!(buf.push(&bytes[4..]), ["café"]);
    }

    #[test]
    fn extract_text_concatenates_parts() {
        let payload =
            r#"{"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#;
        assert_eq!(extract_text(payload), Some("Hello".to_string()));
    }

    #[test]
    fn extract_text_skips_textless_events() {
        assert_eq!(extract_text(r#"{"usageMetadata":{"totalTokenCount":5}}"#), None);
        assert_eq!(extract_text("not json"), None);
        assert_eq!(
            extract_text(r#"{"candidates":[{"finishReason":"STOP"}]}"#),
            None
        );
    }

    #[test]
    fn request_serializes_camel_case() {
        let body = GenerateRequest {
            system_instruction: SystemInstruction {
                parts: vec![Part { text: "sys" }],
            },
            generation_config: GenerationConfig { temperature: 0.7 },
            contents: vec![Content {
                role: TurnRole::Model,
                parts: vec![Part { text: "hi" }],
            }],
        };
        let raw = serde_json::to_string(&body).unwrap();
        assert!(raw.contains("\"systemInstruction\""));
        assert!(raw.contains("\"generationConfig\""));
        assert!(raw.contains("\"role\":\"model\""));
    }
}
