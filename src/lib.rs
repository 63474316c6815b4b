//! Session core of the Math.AI tutoring chat: submitting a problem,
//! consuming the backend's chunked answer stream, credit accounting and
//! transcript management. The rendering front end sits on top of this
//! crate; the inference backend, auth provider and persistence service
//! are external collaborators reached over HTTP.

pub mod analytics;
pub mod auth;
pub mod config;
pub mod conversation;
pub mod credits;
pub mod events;
pub mod model;
pub mod session;
pub mod transport;

pub use config::{init_tracing, BackendConfig};
pub use events::{AppEvent, EventBus};
pub use session::{ChatSession, Phase, ScrollFollower, SubmitError};
pub use transport::{CancelFlag, StreamEvent};
