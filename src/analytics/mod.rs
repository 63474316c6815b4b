use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use serde::Serialize;
use tracing::debug;

use crate::config::BackendConfig;

/// Usage event emitted after a completed answer. Feeds the admin
/// dashboard; always best-effort.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsEvent {
    pub user_id: String,
    pub conversation_id: String,
    pub question_chars: usize,
    pub answer_chars: usize,
    pub ts: i64,
}

pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: AnalyticsEvent) -> BoxFuture<'_, Result<()>>;
}

pub struct HttpAnalytics {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAnalytics {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
        }
    }
}

impl AnalyticsSink for HttpAnalytics {
    fn record(&self, event: AnalyticsEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let url = format!("{}/api/analytics/events", self.base_url);
            let response = self
                .client
                .post(&url)
                .json(&event)
                .send()
                .await
                .context("analytics request failed")?;
            if !response.status().is_success() {
                anyhow::bail!("analytics endpoint returned {}", response.status().as_u16());
            }
            Ok(())
        })
    }
}

/// Sink that drops everything; used when no dashboard is wired up.
pub struct NullAnalytics;

impl AnalyticsSink for NullAnalytics {
    fn record(&self, _event: AnalyticsEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Fire-and-forget dispatch; failures never reach the user.
pub fn dispatch(sink: &Arc<dyn AnalyticsSink>, event: AnalyticsEvent) {
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        if let Err(err) = sink.record(event).await {
            debug!("analytics event dropped: {err}");
        }
    });
}
