use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const GUEST_USER_ID: &str = "guest";

/// Client-local pseudo-id for anonymous users, stable for the process
/// lifetime.
pub static GUEST_PSEUDO_ID: Lazy<String> = Lazy::new(|| {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("guest-{suffix:06}")
});

pub fn is_guest(user_id: &str) -> bool {
    user_id == GUEST_USER_ID || user_id.starts_with("guest-")
}

/// File or image attached to a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: usize,
    #[serde(rename = "previewBase64", default)]
    pub preview_base64: Option<String>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, size: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.into(),
            mime_type: mime_type.into(),
            size,
            preview_base64: None,
        }
    }
}

/// A submitted question. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    pub user_id: String,
    pub ts: i64,
}

impl Problem {
    pub fn new(
        text: impl Into<String>,
        attachment: Option<Attachment>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            attachment,
            user_id: user_id.into(),
            ts: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachment.is_none()
    }
}
