use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::events::{AppEvent, EventBus};
use crate::model::{derive_title, ChatMessage, Conversation, Solution, SolutionStatus};

/// Read/write contract of the opaque persistence collaborator.
pub trait ConversationBackend: Send + Sync {
    fn save<'a>(
        &'a self,
        conversation: &'a Conversation,
        token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<()>>;

    fn fetch<'a>(
        &'a self,
        conversation_id: &'a str,
        user_id: &'a str,
        token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Conversation>>;
}

/// HTTP persistence backend.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
        }
    }
}

impl ConversationBackend for HttpBackend {
    fn save<'a>(
        &'a self,
        conversation: &'a Conversation,
        token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = format!("{}/api/conversations/{}", self.base_url, conversation.id);
            let mut request = self.client.put(&url).json(conversation);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await.context("conversation sync failed")?;
            let status = response.status();
            if !status.is_success() {
                anyhow::bail!("conversation sync returned {}", status.as_u16());
            }
            Ok(())
        })
    }

    fn fetch<'a>(
        &'a self,
        conversation_id: &'a str,
        user_id: &'a str,
        token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Conversation>> {
        Box::pin(async move {
            let url = format!(
                "{}/api/conversations/{}?user_id={}",
                self.base_url, conversation_id, user_id
            );
            let mut request = self.client.get(&url);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await.context("conversation load failed")?;
            let status = response.status();
            if !status.is_success() {
                anyhow::bail!("conversation load returned {}", status.as_u16());
            }
            Ok(response.json().await.context("bad conversation payload")?)
        })
    }
}

/// Append-only in-memory transcript plus best-effort persistence sync.
/// This store is the single writer of transcript state; every mutation
/// goes through one of its methods, so a chunk arrival can never race a
/// stale read-compute-write cycle.
pub struct ConversationStore {
    backend: Arc<dyn ConversationBackend>,
    events: EventBus,
    conversation: Option<Conversation>,
    streaming: bool,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn ConversationBackend>, events: EventBus) -> Self {
        Self {
            backend,
            events,
            conversation: None,
            streaming: false,
        }
    }

    /// Lazily create the conversation on first submission; subsequent
    /// calls return the cached id.
    pub fn ensure(&mut self, first_question: &str, user_id: &str) -> String {
        if let Some(conversation) = &self.conversation {
            return conversation.id.clone();
        }
        let conversation = Conversation::new(derive_title(first_question), user_id);
        let id = conversation.id.clone();
        info!(conversation_id = id.as_str(), "conversation created");
        self.conversation = Some(conversation);
        id
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.conversation.as_ref().map(|c| c.id.clone())
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.conversation
            .as_ref()
            .map(|c| c.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn append(&mut self, message: ChatMessage) {
        let Some(conversation) = self.conversation.as_mut() else {
            warn!("append without a conversation, dropping message");
            return;
        };
        conversation.messages.push(message);
        conversation.updated_ts = chrono::Utc::now().timestamp();
        self.events.emit(AppEvent::ConversationUpdated);
    }

    /// Atomic read-modify-write on one assistant message's solution. The
    /// closure runs against the current state in a single step; callers
    /// must never read the transcript, compute and write back separately.
    pub fn update_solution(&mut self, message_id: &str, f: impl FnOnce(&mut Solution)) {
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        let found = conversation
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.id == message_id)
            .and_then(|m| m.solution_mut());
        match found {
            Some(solution) => {
                f(solution);
                conversation.updated_ts = chrono::Utc::now().timestamp();
                self.events.emit(AppEvent::ConversationUpdated);
            }
            None => warn!(message_id, "no assistant message to update"),
        }
    }

    /// Remove trailing assistant messages still in streaming or error
    /// status. This is the retry cleanup, the only transcript mutation
    /// besides append.
    pub fn retry_cleanup(&mut self) {
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        let mut removed = 0usize;
        while let Some(last) = conversation.messages.last() {
            let failed = last
                .solution()
                .map(|s| matches!(s.status, SolutionStatus::Streaming | SolutionStatus::Error))
                .unwrap_or(false);
            if !failed {
                break;
            }
            conversation.messages.pop();
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, "cleaned up failed assistant turn");
            self.events.emit(AppEvent::ConversationUpdated);
        }
    }

    /// Most recent user message, for retry.
    pub fn last_problem(&self) -> Option<&crate::model::Problem> {
        self.conversation
            .as_ref()?
            .messages
            .iter()
            .rev()
            .find_map(|m| m.problem())
    }

    pub fn last_solution(&self) -> Option<&Solution> {
        self.conversation
            .as_ref()?
            .messages
            .iter()
            .rev()
            .find_map(|m| m.solution())
    }

    /// Persistence calls are suppressed while a stream is in progress and
    /// flushed once at each terminal transition.
    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    /// Fire-and-forget sync to the persistence collaborator. Failures are
    /// logged and swallowed; returns the task handle so tests can await it.
    pub fn persist(&self, token: Option<String>) -> Option<JoinHandle<()>> {
        if self.streaming {
            debug!("persist suppressed while streaming");
            return None;
        }
        let conversation = self.conversation.clone()?;
        let backend = Arc::clone(&self.backend);
        Some(tokio::spawn(async move {
            if let Err(err) = backend.save(&conversation, token.as_deref()).await {
                warn!(
                    conversation_id = conversation.id.as_str(),
                    "conversation sync failed: {err}"
                );
            }
        }))
    }

    /// Replace the transcript with a stored conversation.
    pub async fn load(
        &mut self,
        conversation_id: &str,
        user_id: &str,
        token: Option<&str>,
    ) -> Result<()> {
        let conversation = self.backend.fetch(conversation_id, user_id, token).await?;
        info!(
            conversation_id,
            messages = conversation.messages.len(),
            "conversation loaded"
        );
        self.conversation = Some(conversation);
        self.events.emit(AppEvent::LoadConversation {
            conversation_id: conversation_id.to_string(),
        });
        self.events.emit(AppEvent::ConversationUpdated);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.conversation = None;
        self.streaming = false;
        self.events.emit(AppEvent::ResetChat);
    }
}
