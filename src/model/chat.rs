use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::problem::Problem;
use super::solution::Solution;

const TITLE_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum MessageBody {
    User { problem: Problem },
    Assistant { solution: Solution },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub ts: i64,
    pub body: MessageBody,
}

impl ChatMessage {
    pub fn user(problem: Problem) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: chrono::Utc::now().timestamp(),
            body: MessageBody::User { problem },
        }
    }

    pub fn assistant(solution: Solution) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: chrono::Utc::now().timestamp(),
            body: MessageBody::Assistant { solution },
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self.body, MessageBody::Assistant { .. })
    }

    pub fn problem(&self) -> Option<&Problem> {
        match &self.body {
            MessageBody::User { problem } => Some(problem),
            MessageBody::Assistant { .. } => None,
        }
    }

    pub fn solution(&self) -> Option<&Solution> {
        match &self.body {
            MessageBody::Assistant { solution } => Some(solution),
            MessageBody::User { .. } => None,
        }
    }

    pub fn solution_mut(&mut self) -> Option<&mut Solution> {
        match &mut self.body {
            MessageBody::Assistant { solution } => Some(solution),
            MessageBody::User { .. } => None,
        }
    }
}

/// One tutoring conversation. Messages are append-only except for retry
/// cleanup and an explicit reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub user_id: String,
    pub messages: Vec<ChatMessage>,
    pub created_ts: i64,
    pub updated_ts: i64,
}

impl Conversation {
    pub fn new(title: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            created_ts: now,
            updated_ts: now,
        }
    }
}

/// Conversation title from the first question text.
pub fn derive_title(text: &str) -> String {
    text.trim().chars().take(TITLE_MAX_CHARS).collect()
}
