use std::time::Duration;

use anyhow::Result;
use futures_util::future::BoxFuture;
use tracing::warn;

const TOKEN_ATTEMPTS: u32 = 3;
const TOKEN_BACKOFF_MS: u64 = 200;

/// Supplies a bearer token on demand. The session provider behind this is
/// an external collaborator; guests simply have no token.
pub trait TokenProvider: Send + Sync {
    fn fetch_token(&self) -> BoxFuture<'_, Result<Option<String>>>;
}

/// Provider for unauthenticated sessions.
pub struct NoAuth;

impl TokenProvider for NoAuth {
    fn fetch_token(&self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async { Ok(None) })
    }
}

/// Fixed token, useful for embedders that already hold a session token
/// and for tests.
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn fetch_token(&self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move { Ok(Some(self.0.clone())) })
    }
}

/// Fetch a token with up to three attempts and a short growing backoff.
/// Gives up and returns None so the submission proceeds with guest
/// treatment instead of failing.
pub async fn acquire_token(provider: &dyn TokenProvider) -> Option<String> {
    for attempt in 1..=TOKEN_ATTEMPTS {
        match provider.fetch_token().await {
            Ok(token) => return token,
            Err(err) => {
                warn!(attempt, "token fetch failed: {err}");
                if attempt < TOKEN_ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(TOKEN_BACKOFF_MS * attempt as u64))
                        .await;
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::{anyhow, Result};
    use futures_util::future::BoxFuture;

    use super::{acquire_token, NoAuth, StaticToken, TokenProvider};

    struct FlakyProvider {
        calls: AtomicU32,
        succeed_on: u32,
    }

    impl TokenProvider for FlakyProvider {
        fn fetch_token(&self) -> BoxFuture<'_, Result<Option<String>>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call >= self.succeed_on {
                    Ok(Some("tok".to_string()))
                } else {
                    Err(anyhow!("transient"))
                }
            })
        }
    }

    #[tokio::test]
    async fn static_token_is_returned() {
        assert_eq!(
            acquire_token(&StaticToken("abc".into())).await.as_deref(),
            Some("abc")
        );
    }

    #[tokio::test]
    async fn no_auth_yields_none() {
        assert_eq!(acquire_token(&NoAuth).await, None);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        };
        assert_eq!(acquire_token(&provider).await.as_deref(), Some("tok"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            succeed_on: 10,
        };
        assert_eq!(acquire_token(&provider).await, None);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }
}
