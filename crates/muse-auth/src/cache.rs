use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{AuthError, IsUnauthorized, Result, TokenIssuer};

/// Cached bearer token and the window it is trusted for
struct Credential {
    value: Option<SecretString>,
    fetched_at: Instant,
    valid_for: Duration,
}

impl Credential {
    fn empty() -> Self {
        Self {
            value: None,
            fetched_at: Instant::now(),
            valid_for: Duration::ZERO,
        }
    }

    fn current(&self) -> Option<&SecretString> {
        self.value
            .as_ref()
            .filter(|_| Instant::now() < self.fetched_at + self.valid_for)
    }
}

struct Inner {
    issuer: Arc<dyn TokenIssuer>,
    ttl: Duration,
    credential: RwLock<Credential>,
    /// Held for the duration of a fetch so only one reaches the issuer
    refresh: Mutex<()>,
}

impl Inner {
    async fn cached(&self) -> Option<SecretString> {
        self.credential.read().await.current().cloned()
    }

    /// Fetch a token and swap it in; the caller must hold `refresh`
    async fn fetch(&self) -> Result<SecretString> {
        match self.issuer.fetch_token().await {
            Ok(issued) => {
                let valid_for = issued.valid_for(self.ttl);
                let value = issued.value;

                *self.credential.write().await = Credential {
                    value: Some(value.clone()),
                    fetched_at: Instant::now(),
                    valid_for,
                };

                tracing::debug!(valid_for = ?valid_for, "bearer token refreshed");
                Ok(value)
            }
            Err(e) => {
                *self.credential.write().await = Credential::empty();
                Err(e)
            }
        }
    }
}

/// Shared bearer token cache with single-flight refresh
///
/// Readers of a valid token only take the read side of the lock. On a
/// miss, callers serialize on a dedicated refresh mutex and re-check the
/// cache once they hold it, so concurrent cold-cache callers trigger
/// exactly one call to the [`TokenIssuer`]. The network call is never made
/// while holding the credential write lock.
///
/// Dropping a pending [`token`](Self::token) future abandons the wait; a
/// fetch in progress is abandoned with it and the next caller retries.
#[derive(Clone)]
pub struct CredentialCache {
    inner: Arc<Inner>,
}

impl CredentialCache {
    /// Create a cache that fetches lazily on first use
    pub fn new(issuer: Arc<dyn TokenIssuer>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                issuer,
                ttl,
                credential: RwLock::new(Credential::empty()),
                refresh: Mutex::new(()),
            }),
        }
    }

    /// Create a cache and start its background refresh loop
    ///
    /// The loop refreshes immediately, then every `refresh_interval`. A
    /// failed refresh clears the cached token so the next caller fetches
    /// synchronously. The loop stops when `shutdown` is cancelled or the
    /// last handle to the cache is dropped.
    pub fn spawn(
        issuer: Arc<dyn TokenIssuer>,
        ttl: Duration,
        refresh_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let cache = Self::new(issuer, ttl);
        tokio::spawn(refresh_loop(Arc::downgrade(&cache.inner), refresh_interval, shutdown));
        cache
    }

    /// Get a valid bearer token, fetching one if needed
    pub async fn token(&self) -> Result<SecretString> {
        if let Some(token) = self.inner.cached().await {
            return Ok(token);
        }

        let _refresh = self.inner.refresh.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(token) = self.inner.cached().await {
            return Ok(token);
        }

        self.inner.fetch().await
    }

    /// Fetch a new token regardless of the cached one
    pub async fn refresh(&self) -> Result<SecretString> {
        let _refresh = self.inner.refresh.lock().await;
        self.inner.fetch().await
    }

    /// Drop the cached token so the next [`token`](Self::token) fetches
    pub async fn invalidate(&self) {
        *self.inner.credential.write().await = Credential::empty();
        tracing::debug!("bearer token invalidated");
    }

    /// Run `op` with a bearer token, retrying once on an unauthorized error
    ///
    /// When `op` fails with an error whose [`IsUnauthorized`] check holds,
    /// the cache is invalidated and `op` runs again with a freshly fetched
    /// token. A second unauthorized error is returned as is.
    pub async fn with_token<T, E, F, Fut>(&self, mut op: F) -> std::result::Result<T, E>
    where
        F: FnMut(SecretString) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<AuthError> + IsUnauthorized,
    {
        let token = self.token().await?;

        match op(token).await {
            Err(e) if e.is_unauthorized() => {
                tracing::warn!("bearer token rejected, refreshing and retrying");
                self.invalidate().await;
                let token = self.token().await?;
                op(token).await
            }
            result => result,
        }
    }
}

async fn refresh_loop(inner: Weak<Inner>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };

        let _refresh = inner.refresh.lock().await;

        let result = tokio::select! {
            () = shutdown.cancelled() => break,
            result = inner.fetch() => result,
        };

        if let Err(e) = result {
            tracing::error!(error = %e, "background token refresh failed, cache cleared");
        }
    }

    tracing::debug!("token refresh loop stopped");
}
