use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_GUEST_CREDITS: u32 = 100;
pub const DEFAULT_QUESTION_LIMIT: usize = 4000;

/// Backend connection settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub guest_credits: u32,
    pub question_limit: usize,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, guest_credits: u32, question_limit: usize) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            guest_credits,
            question_limit,
        }
    }

    pub fn from_env() -> Self {
        let base_url =
            dotenvy::var("MATHAI_BACKEND_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let guest_credits = dotenvy::var("MATHAI_GUEST_CREDITS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_GUEST_CREDITS);
        let question_limit = dotenvy::var("MATHAI_QUESTION_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_QUESTION_LIMIT);

        Self::new(base_url, guest_credits, question_limit)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, DEFAULT_GUEST_CREDITS, DEFAULT_QUESTION_LIMIT)
    }
}

/// Install the global tracing subscriber. Safe to call more than once;
/// later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
