//! One chat conversation: welcome-seeded transcript, quota gating, and
//! streaming turns.
//!
//! The turn sequence is check → record → send. The limit check is a hard
//! stop evaluated before anything else, so a rejected turn never touches the
//! counter or the network. Usage is recorded at acceptance and is not rolled
//! back by a later stream failure — the message was accepted.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::auth::Session;
use crate::provider::{ChatProvider, ProviderError, ProviderSession};
use crate::quota::{QuotaTracker, Subject};

const STREAM_FAILURE_NOTICE: &str =
    "Sorry, something went wrong handling that request. Please try again.";

// ─── Transcript ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: i64,
    /// Still receiving fragments — lets the front end mark the reply as
    /// in-progress.
    pub streaming: bool,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now().timestamp_millis(),
            streaming: false,
        }
    }
}

// ─── Turn outcome ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ChatError {
    /// The quota gate rejected the turn before any side effect.
    #[error("message limit reached — all {0} messages used")]
    LimitReached(u32),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// How an accepted turn ended. A stream failure is recovered locally (the
/// transcript gets a synthetic notice), so it is an outcome, not an error.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed,
    Failed(ProviderError),
}

// ─── ChatClient ───────────────────────────────────────────────────────────────

pub struct ChatClient {
    provider: Arc<dyn ChatProvider>,
    session: ProviderSession,
    quota: QuotaTracker,
    subject: Subject,
    transcript: Vec<Message>,
    system_prompt: String,
}

impl ChatClient {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        quota: QuotaTracker,
        subject: Subject,
        auth_session: &Session,
        system_prompt: &str,
    ) -> Self {
        let session = provider.create_session(system_prompt);
        Self {
            provider,
            session,
            quota,
            subject,
            transcript: vec![Message::new(MessageRole::Model, &auth_session.welcome)],
            system_prompt: system_prompt.to_string(),
        }
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub async fn remaining(&self) -> Result<Option<u32>> {
        self.quota.remaining(&self.subject).await
    }

    pub async fn is_limit_reached(&self) -> Result<bool> {
        self.quota.is_limit_reached(&self.subject).await
    }

    /// Drops the transcript and opens a fresh backend session.
    pub fn clear(&mut self) {
        self.transcript.clear();
        self.session = self.provider.create_session(&self.system_prompt);
    }

    /// Runs one turn. Fragments are appended to a streaming placeholder as
    /// they arrive (and forwarded to `on_fragment`); on stream failure the
    /// placeholder is rolled back and one synthetic notice appended, leaving
    /// the rest of the conversation intact.
    pub async fn send_turn(
        &mut self,
        prompt: &str,
        on_fragment: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<TurnOutcome, ChatError> {
        if self.quota.is_limit_reached(&self.subject).await? {
            return Err(ChatError::LimitReached(self.quota.cap()));
        }
        self.quota.record_usage(&self.subject).await?;

        self.transcript.push(Message::new(MessageRole::User, prompt));
        let placeholder_id = Uuid::new_v4().to_string();
        self.transcript.push(Message {
            id: placeholder_id.clone(),
            role: MessageRole::Model,
            content: String::new(),
            timestamp: Utc::now().timestamp_millis(),
            streaming: true,
        });

        // Split borrows: the callback grows the placeholder while the
        // provider drives the stream.
        let provider = Arc::clone(&self.provider);
        let transcript = &mut self.transcript;
        let session = &mut self.session;
        let mut append = |fragment: &str| {
            if let Some(m) = transcript.iter_mut().find(|m| m.id == placeholder_id) {
                m.content.push_str(fragment);
            }
            on_fragment(fragment);
        };

        let result = provider.stream_send(session, prompt, &mut append).await;
        match result {
            Ok(_) => {
                if let Some(m) = transcript.iter_mut().find(|m| m.id == placeholder_id) {
                    m.streaming = false;
                }
                Ok(TurnOutcome::Completed)
            }
            Err(e) => {
                transcript.retain(|m| m.id != placeholder_id);
                transcript.push(Message::new(MessageRole::Model, STREAM_FAILURE_NOTICE));
                warn!(err = %e, "stream failed — transcript rolled back");
                Ok(TurnOutcome::Failed(e))
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
