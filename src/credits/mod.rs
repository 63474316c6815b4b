use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::BackendConfig;
use crate::events::{AppEvent, EventBus};
use crate::model::{is_guest, CreditsRecord};

/// A balance is either a confirmed server value or a local guess. Callers
/// that block submissions need to know the difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Balance {
    Unknown,
    Optimistic(u32),
    Authoritative(u32),
}

impl Balance {
    pub fn value(&self) -> Option<u32> {
        match self {
            Balance::Unknown => None,
            Balance::Optimistic(n) | Balance::Authoritative(n) => Some(*n),
        }
    }

    /// Only a known-zero balance blocks; Unknown proceeds optimistically.
    pub fn is_exhausted(&self) -> bool {
        self.value() == Some(0)
    }
}

#[derive(Deserialize)]
struct CreditsResponse {
    remaining: u32,
}

/// Tracks the remaining usage allowance for the current user and keeps the
/// server ledger and the guest fallback from ever both charging the same
/// submission.
pub struct CreditsGuard {
    client: reqwest::Client,
    base_url: String,
    guest_default: u32,
    balance: Balance,
    guest_record: CreditsRecord,
    events: EventBus,
}

impl CreditsGuard {
    pub fn new(config: &BackendConfig, events: EventBus) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            guest_default: config.guest_credits,
            balance: Balance::Unknown,
            guest_record: CreditsRecord::new(config.guest_credits),
            events,
        }
    }

    pub fn balance(&self) -> Balance {
        self.balance
    }

    /// Seed the cached balance, e.g. from a login response.
    pub fn prime(&mut self, balance: Balance) {
        self.balance = balance;
    }

    /// Answerable from cached state alone; no network. For guests this is
    /// the local record (after the daily rollover).
    pub fn cached(&mut self, user_id: &str) -> Balance {
        if is_guest(user_id) {
            let refilled = self.guest_record.roll_over(self.guest_default);
            // A balance the server confirmed stays Authoritative across
            // submissions; the record only re-seeds it when nothing is
            // known yet or the day rolled over.
            if refilled || matches!(self.balance, Balance::Unknown) {
                self.balance = Balance::Optimistic(self.guest_record.remaining);
            }
        }
        self.balance
    }

    /// Full precondition check. A cached zero short-circuits without any
    /// network call; an Unknown balance triggers exactly one authoritative
    /// fetch. A failed fetch proceeds as Unknown rather than blocking.
    pub async fn check(&mut self, user_id: &str, token: Option<&str>) -> Balance {
        let cached = self.cached(user_id);
        if is_guest(user_id) || cached.is_exhausted() {
            return cached;
        }

        if matches!(self.balance, Balance::Unknown) {
            match self.fetch_remaining(user_id, token).await {
                Ok(remaining) => {
                    self.balance = Balance::Authoritative(remaining);
                    self.emit(user_id, remaining);
                }
                Err(err) => {
                    warn!(user_id, "credits fetch failed, proceeding: {err}");
                }
            }
        }
        self.balance
    }

    /// The backend reported a charge mid- or post-stream. Its value is
    /// authoritative and overwrites any local guess.
    pub fn observe_server_charge(&mut self, user_id: &str, remaining: u32) {
        self.balance = Balance::Authoritative(remaining);
        if is_guest(user_id) {
            self.guest_record.remaining = remaining;
        }
        self.emit(user_id, remaining);
    }

    /// Guest-only local decrement.
    pub fn spend_local(&mut self, user_id: &str) {
        if !is_guest(user_id) {
            return;
        }
        self.guest_record.roll_over(self.guest_default);
        if !self.guest_record.spend() {
            warn!("guest credits already exhausted, nothing to spend");
            return;
        }
        self.balance = Balance::Optimistic(self.guest_record.remaining);
        self.emit(user_id, self.guest_record.remaining);
    }

    /// Post-stream reconciliation. The server report always wins; the
    /// local fallback fires only when no report was ever received for this
    /// submission, and only for guests — an authenticated user's ledger is
    /// owned by the server.
    pub fn reconcile(&mut self, user_id: &str, server_remaining: Option<u32>) {
        match server_remaining {
            Some(remaining) => {
                info!(user_id, remaining, "server charge reported");
                self.observe_server_charge(user_id, remaining);
            }
            None if is_guest(user_id) => self.spend_local(user_id),
            None => {}
        }
    }

    async fn fetch_remaining(&self, user_id: &str, token: Option<&str>) -> Result<u32> {
        let url = format!("{}/api/credits/{}", self.base_url, user_id);
        let mut request = self.client.get(&url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.context("credits request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("credits endpoint returned {}", status.as_u16());
        }
        let body: CreditsResponse = response.json().await.context("bad credits payload")?;
        Ok(body.remaining)
    }

    fn emit(&self, user_id: &str, remaining: u32) {
        self.events.emit(AppEvent::CreditsUpdated {
            user_id: user_id.to_string(),
            remaining,
        });
    }
}
