use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolutionStatus {
    Streaming,
    Ok,
    Error,
    Cancelled,
}

impl SolutionStatus {
    /// A terminal solution never transitions back to streaming without a
    /// new submission.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SolutionStatus::Streaming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

/// Citation sent with the `start` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// The mutable artifact of one assistant turn. Created as an empty
/// placeholder the instant a submission begins, then mutated in place as
/// stream frames arrive. `content` only ever grows while streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub id: String,
    pub content: String,
    #[serde(rename = "finalAnswer", default)]
    pub final_answer: Option<String>,
    pub status: SolutionStatus,
    #[serde(default)]
    pub confidence: Option<u8>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(rename = "chargedRemaining", default)]
    pub charged_remaining: Option<u32>,
}

impl Solution {
    pub fn placeholder() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: String::new(),
            final_answer: None,
            status: SolutionStatus::Streaming,
            confidence: None,
            sources: Vec::new(),
            charged_remaining: None,
        }
    }

    pub fn confidence_level(&self) -> Option<ConfidenceLevel> {
        self.confidence.map(|c| {
            if c >= 80 {
                ConfidenceLevel::High
            } else if c >= 50 {
                ConfidenceLevel::Medium
            } else {
                ConfidenceLevel::Low
            }
        })
    }
}
