//! In-memory access-token cache shared by every channel client.
//!
//! Entries live in a `DashMap` (sharded readers-writer locks), so lookups from
//! concurrent sends never block each other and never observe a half-written
//! entry. Refreshes are single-flight per key: concurrent misses for the same
//! identity wait on one issuance and then read its result.
//!
//! Entries are replaced on refresh and never removed.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use relay_types::error::{RelayError, RelayResult};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Seconds shaved off the provider-declared TTL to absorb clock skew and
/// in-flight request latency.
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// A cached token and the instant it stops being usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedCredential {
    /// Usable iff the token is non-empty and `now < expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && now < self.expires_at
    }
}

/// A freshly issued token as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub ttl_secs: i64,
}

/// A source of access tokens: one per provider account.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Identity fields that scope the token, as `(name, value)` pairs in a
    /// fixed order. Every value must be non-empty.
    fn identity(&self) -> Vec<(&'static str, String)>;

    /// Call the provider's token endpoint once.
    async fn issue_token(&self) -> RelayResult<IssuedToken>;
}

/// Compute the expiry recorded for a token issued at `issued_at`.
///
/// `None` when the TTL does not fit in a timestamp.
pub fn expiry_for(issued_at: DateTime<Utc>, ttl_secs: i64) -> Option<DateTime<Utc>> {
    let lifetime = Duration::try_seconds(ttl_secs.checked_sub(EXPIRY_SKEW_SECS)?)?;
    issued_at.checked_add_signed(lifetime)
}

/// Deterministic cache key for a set of identity fields.
///
/// Hex SHA-256 of the values joined with `|`, so raw secrets never sit in
/// the key space.
pub fn fingerprint(identity: &[(&'static str, String)]) -> String {
    let joined = identity
        .iter()
        .map(|(_, v)| v.as_str())
        .collect::<Vec<_>>()
        .join("|");
    hex::encode(Sha256::digest(joined.as_bytes()))
}

/// Process-wide token cache. Construct once and share behind an `Arc`.
#[derive(Default)]
pub struct CredentialCache {
    entries: DashMap<String, CachedCredential>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a valid token for `issuer`, refreshing it when missing or expired.
    ///
    /// Fails with [`RelayError::Auth`] when an identity field is empty, when
    /// the provider rejects the request, or when it returns no token or a
    /// non-positive TTL. Failed refreshes leave the cache untouched.
    pub async fn get_token(&self, issuer: &dyn TokenIssuer) -> RelayResult<String> {
        let identity = issuer.identity();
        if let Some((name, _)) = identity.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(RelayError::Auth(format!(
                "missing credential field: {name}"
            )));
        }
        let key = fingerprint(&identity);

        if let Some(token) = self.lookup(&key, Utc::now()) {
            debug!(key = %short(&key), "Access token cache hit");
            return Ok(token);
        }

        let lock = Arc::clone(&*self.refresh_locks.entry(key.clone()).or_default());
        let _guard = lock.lock().await;

        // Another task may have refreshed while we waited.
        if let Some(token) = self.lookup(&key, Utc::now()) {
            return Ok(token);
        }

        let issued = issuer.issue_token().await?;
        if issued.token.is_empty() || issued.ttl_secs <= 0 {
            return Err(RelayError::Auth(format!(
                "invalid access token response (token empty: {}, expires_in: {})",
                issued.token.is_empty(),
                issued.ttl_secs
            )));
        }

        let Some(expires_at) = expiry_for(Utc::now(), issued.ttl_secs) else {
            return Err(RelayError::Auth(format!(
                "invalid access token response (expires_in out of range: {})",
                issued.ttl_secs
            )));
        };
        self.entries.insert(
            key.clone(),
            CachedCredential {
                token: issued.token.clone(),
                expires_at,
            },
        );
        info!(key = %short(&key), %expires_at, "Refreshed access token");

        Ok(issued.token)
    }

    fn lookup(&self, key: &str, now: DateTime<Utc>) -> Option<String> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_valid_at(now))
            .map(|entry| entry.token.clone())
    }

    /// Current entry for a key, valid or not.
    pub fn get(&self, key: &str) -> Option<CachedCredential> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// Store an entry directly, replacing any existing one.
    pub fn put(&self, key: String, credential: CachedCredential) {
        self.entries.insert(key, credential);
    }

    /// Number of stored entries (including expired ones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeIssuer {
        corp_id: String,
        secret: String,
        reply: RelayResult<IssuedToken>,
        calls: AtomicUsize,
        delay_ms: u64,
    }

    impl FakeIssuer {
        fn new(corp_id: &str, secret: &str, token: &str, ttl_secs: i64) -> Self {
            Self {
                corp_id: corp_id.to_string(),
                secret: secret.to_string(),
                reply: Ok(IssuedToken {
                    token: token.to_string(),
                    ttl_secs,
                }),
                calls: AtomicUsize::new(0),
                delay_ms: 0,
            }
        }

        fn failing(corp_id: &str, secret: &str) -> Self {
            let mut issuer = Self::new(corp_id, secret, "", 0);
            issuer.reply = Err(RelayError::Auth("invalid corpsecret".to_string()));
            issuer
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenIssuer for FakeIssuer {
        fn identity(&self) -> Vec<(&'static str, String)> {
            vec![
                ("corp_id", self.corp_id.clone()),
                ("agent_secret", self.secret.clone()),
            ]
        }

        async fn issue_token(&self) -> RelayResult<IssuedToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            match &self.reply {
                Ok(t) => Ok(t.clone()),
                Err(e) => Err(RelayError::Auth(e.to_string())),
            }
        }
    }

    #[test]
    fn test_expiry_subtracts_skew() {
        let issued_at = Utc::now();
        let expires_at = expiry_for(issued_at, 7200).unwrap();
        assert_eq!((expires_at - issued_at).num_seconds(), 7140);
    }

    #[test]
    fn test_expiry_out_of_range_is_none() {
        assert!(expiry_for(Utc::now(), 1_000_000_000_000_000).is_none());
        assert!(expiry_for(Utc::now(), i64::MAX).is_none());
    }

    #[tokio::test]
    async fn test_huge_ttl_is_auth_error_not_cached() {
        let cache = CredentialCache::new();
        let issuer = FakeIssuer::new("ww1", "sec", "tok", 1_000_000_000_000_000);
        let err = cache.get_token(&issuer).await.unwrap_err();
        assert!(matches!(err, RelayError::Auth(ref m) if m.contains("expires_in out of range")));
        assert_eq!(issuer.calls(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_fingerprint_is_deterministic_and_hides_secret() {
        let a = fingerprint(&[("corp_id", "ww1".to_string()), ("secret", "s".to_string())]);
        let b = fingerprint(&[("corp_id", "ww1".to_string()), ("secret", "s".to_string())]);
        let c = fingerprint(&[("corp_id", "ww1".to_string()), ("secret", "t".to_string())]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);

        let secretive = fingerprint(&[("secret", "hunter2-very-secret".to_string())]);
        assert!(!secretive.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_identical_identity_shares_entry() {
        let cache = CredentialCache::new();
        let first = FakeIssuer::new("ww1", "sec", "tok-1", 7200);
        let second = FakeIssuer::new("ww1", "sec", "tok-2", 7200);

        assert_eq!(cache.get_token(&first).await.unwrap(), "tok-1");
        assert_eq!(cache.get_token(&second).await.unwrap(), "tok-1");
        assert_eq!(cache.get_token(&first).await.unwrap(), "tok-1");
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_one_refresh() {
        let cache = CredentialCache::new();
        let issuer = FakeIssuer::new("ww1", "sec", "fresh", 7200);
        let key = fingerprint(&issuer.identity());
        cache.put(
            key.clone(),
            CachedCredential {
                token: "stale".to_string(),
                expires_at: Utc::now() - Duration::seconds(1),
            },
        );

        assert_eq!(cache.get_token(&issuer).await.unwrap(), "fresh");
        assert_eq!(cache.get_token(&issuer).await.unwrap(), "fresh");
        assert_eq!(issuer.calls(), 1);

        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.token, "fresh");
        assert!(entry.expires_at > Utc::now() + Duration::seconds(7000));
    }

    #[tokio::test]
    async fn test_empty_identity_field_is_auth_error() {
        let cache = CredentialCache::new();
        let issuer = FakeIssuer::new("ww1", "", "tok", 7200);
        let err = cache.get_token(&issuer).await.unwrap_err();
        assert!(matches!(err, RelayError::Auth(ref m) if m.contains("agent_secret")));
        assert_eq!(issuer.calls(), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_not_cached() {
        let cache = CredentialCache::new();
        let issuer = FakeIssuer::failing("ww1", "bad");
        assert!(matches!(
            cache.get_token(&issuer).await,
            Err(RelayError::Auth(_))
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_token_response_rejected() {
        let cache = CredentialCache::new();
        let no_token = FakeIssuer::new("ww1", "sec", "", 7200);
        assert!(matches!(
            cache.get_token(&no_token).await,
            Err(RelayError::Auth(_))
        ));
        let zero_ttl = FakeIssuer::new("ww2", "sec", "tok", 0);
        assert!(matches!(
            cache.get_token(&zero_ttl).await,
            Err(RelayError::Auth(_))
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_misses_single_flight() {
        let cache = Arc::new(CredentialCache::new());
        let mut issuer = FakeIssuer::new("ww1", "sec", "shared", 7200);
        issuer.delay_ms = 50;
        let issuer = Arc::new(issuer);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let issuer = Arc::clone(&issuer);
            handles.push(tokio::spawn(async move {
                cache.get_token(issuer.as_ref()).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "shared");
        }
        assert_eq!(issuer.calls(), 1);
    }
}
