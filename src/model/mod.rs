pub mod chat;
pub mod credits;
pub mod problem;
pub mod solution;

pub use chat::{derive_title, ChatMessage, Conversation, MessageBody};
pub use credits::CreditsRecord;
pub use problem::{is_guest, Attachment, Problem, GUEST_PSEUDO_ID, GUEST_USER_ID};
pub use solution::{ConfidenceLevel, Solution, SolutionStatus, Source};
