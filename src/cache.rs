//! Distributed cache abstraction and the authorization-request store.
//!
//! The middleware keeps two kinds of short-lived state in the cache:
//! continuation blobs (serialized authorization requests keyed by
//! `unique_id`) and opaque authorization-code payloads keyed by a random
//! 256-bit key. Both carry an absolute expiration.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{OidcError, OidcResult};
use crate::message::{ProtocolMessage, RequestType};
use crate::options::Clock;

/// Binary frame version for continuation entries.
const FRAME_VERSION: i32 = 1;

/// Continuation entries live for one hour.
pub(crate) fn continuation_ttl() -> Duration {
    Duration::hours(1)
}

/// Key-value cache for short-lived binary blobs.
///
/// Implementations must be safe for concurrent access. Any backend works:
/// the in-memory implementation below, or an external store.
#[async_trait]
pub trait DistributedCache: Send + Sync {
    /// Gets a value, or `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> OidcResult<Option<Vec<u8>>>;

    /// Sets a value with an absolute expiration.
    async fn set(&self, key: &str, value: Vec<u8>, expires_at: DateTime<Utc>) -> OidcResult<()>;

    /// Removes a value. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> OidcResult<()>;
}

/// In-memory cache suitable for single-instance deployments and tests.
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCache {
    /// Creates an empty cache reading expirations from the given clock.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Removes every expired entry, returning how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.utc_now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - entries.len()
    }
}

#[async_trait]
impl DistributedCache for InMemoryCache {
    async fn get(&self, key: &str) -> OidcResult<Option<Vec<u8>>> {
        let now = self.clock.utc_now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, expires_at: DateTime<Utc>) -> OidcResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn remove(&self, key: &str) -> OidcResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Encodes message parameters into the versioned continuation frame:
/// `version:i32 LE, count:i32 LE`, then per pair two length-prefixed
/// (`u32 LE`) UTF-8 strings.
#[must_use]
pub fn encode_frame(message: &ProtocolMessage) -> Vec<u8> {
    let mut frame = Vec::with_capacity(64);
    frame.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    frame.extend_from_slice(&(message.len() as i32).to_le_bytes());
    for (name, value) in message.iter() {
        write_string(&mut frame, name);
        write_string(&mut frame, value);
    }
    frame
}

/// Decodes a continuation frame back into an authorization request.
///
/// # Errors
///
/// Returns `OidcError::InvalidRequest` on version mismatch or a malformed
/// frame; callers treat that like a cache miss.
pub fn decode_frame(frame: &[u8]) -> OidcResult<ProtocolMessage> {
    let mut cursor = 0usize;
    let version = read_i32(frame, &mut cursor)?;
    if version != FRAME_VERSION {
        return Err(OidcError::InvalidRequest(format!(
            "unsupported continuation frame version: {version}"
        )));
    }

    let count = read_i32(frame, &mut cursor)?;
    let count = usize::try_from(count)
        .map_err(|_| OidcError::InvalidRequest("negative parameter count".to_string()))?;

    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let name = read_string(frame, &mut cursor)?;
        let value = read_string(frame, &mut cursor)?;
        pairs.push((name, value));
    }

    Ok(ProtocolMessage::from_pairs(
        RequestType::AuthenticationRequest,
        pairs,
    ))
}

fn write_string(frame: &mut Vec<u8>, s: &str) {
    #[allow(clippy::cast_possible_truncation)]
    frame.extend_from_slice(&(s.len() as u32).to_le_bytes());
    frame.extend_from_slice(s.as_bytes());
}

fn read_i32(frame: &[u8], cursor: &mut usize) -> OidcResult<i32> {
    let bytes: [u8; 4] = frame
        .get(*cursor..*cursor + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| OidcError::InvalidRequest("truncated continuation frame".to_string()))?;
    *cursor += 4;
    Ok(i32::from_le_bytes(bytes))
}

fn read_string(frame: &[u8], cursor: &mut usize) -> OidcResult<String> {
    let len = read_i32(frame, cursor)?;
    let len = usize::try_from(len)
        .map_err(|_| OidcError::InvalidRequest("negative string length".to_string()))?;
    let bytes = frame
        .get(*cursor..*cursor + len)
        .ok_or_else(|| OidcError::InvalidRequest("truncated continuation frame".to_string()))?;
    *cursor += len;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| OidcError::InvalidRequest("continuation frame is not UTF-8".to_string()))
}

/// Cache adapter for serialized authorization requests.
///
/// Entries are keyed by the opaque `unique_id` under a dedicated namespace
/// and live for one hour.
pub struct RequestStore {
    cache: Arc<dyn DistributedCache>,
}

impl RequestStore {
    /// Wraps the given cache.
    #[must_use]
    pub fn new(cache: Arc<dyn DistributedCache>) -> Self {
        Self { cache }
    }

    fn key(unique_id: &str) -> String {
        format!("oidc-server:request:{unique_id}")
    }

    /// Stores the authorization request under its `unique_id`.
    ///
    /// # Errors
    ///
    /// Propagates cache backend failures.
    pub async fn store(
        &self,
        unique_id: &str,
        message: &ProtocolMessage,
        now: DateTime<Utc>,
    ) -> OidcResult<()> {
        self.cache
            .set(
                &Self::key(unique_id),
                encode_frame(message),
                now + continuation_ttl(),
            )
            .await
    }

    /// Loads a stored authorization request.
    ///
    /// A malformed or wrong-version frame is reported as a miss.
    ///
    /// # Errors
    ///
    /// Propagates cache backend failures.
    pub async fn load(&self, unique_id: &str) -> OidcResult<Option<ProtocolMessage>> {
        let Some(frame) = self.cache.get(&Self::key(unique_id)).await? else {
            return Ok(None);
        };
        match decode_frame(&frame) {
            Ok(message) => Ok(Some(message)),
            Err(error) => {
                tracing::warn!(%unique_id, %error, "discarding undecodable continuation entry");
                Ok(None)
            }
        }
    }

    /// Removes a stored authorization request.
    ///
    /// # Errors
    ///
    /// Propagates cache backend failures.
    pub async fn remove(&self, unique_id: &str) -> OidcResult<()> {
        self.cache.remove(&Self::key(unique_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::FixedClock;

    fn message() -> ProtocolMessage {
        ProtocolMessage::from_pairs(
            RequestType::AuthenticationRequest,
            [
                ("response_type", "code"),
                ("client_id", "c1"),
                ("redirect_uri", "https://app.example/cb"),
                ("scope", "openid profile"),
                ("state", "xyz"),
            ],
        )
    }

    #[test]
    fn frame_round_trip_preserves_order_and_values() {
        let original = message();
        let decoded = decode_frame(&encode_frame(&original)).unwrap();
        let left: Vec<_> = original.iter().collect();
        let right: Vec<_> = decoded.iter().collect();
        assert_eq!(left, right);
    }

    #[test]
    fn frame_rejects_unknown_version() {
        let mut frame = encode_frame(&message());
        frame[0] = 7;
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn frame_rejects_truncation() {
        let frame = encode_frame(&message());
        assert!(decode_frame(&frame[..frame.len() - 3]).is_err());
        assert!(decode_frame(&frame[..6]).is_err());
    }

    #[tokio::test]
    async fn in_memory_cache_expires_entries() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let cache = InMemoryCache::new(clock.clone());

        let expires = clock.utc_now() + Duration::seconds(60);
        cache.set("k", b"v".to_vec(), expires).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));

        clock.advance(Duration::seconds(61));
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.purge_expired().await, 1);
    }

    #[tokio::test]
    async fn in_memory_cache_remove() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let cache = InMemoryCache::new(clock.clone());
        let expires = clock.utc_now() + Duration::hours(1);

        cache.set("k", b"v".to_vec(), expires).await.unwrap();
        cache.remove("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        cache.remove("absent").await.unwrap();
    }

    #[tokio::test]
    async fn request_store_round_trip() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let cache = Arc::new(InMemoryCache::new(clock.clone()));
        let store = RequestStore::new(cache);

        let now = clock.utc_now();
        store.store("u1", &message(), now).await.unwrap();

        let loaded = store.load("u1").await.unwrap().unwrap();
        assert_eq!(loaded.client_id(), Some("c1"));
        assert_eq!(loaded.state(), Some("xyz"));

        store.remove("u1").await.unwrap();
        assert!(store.load("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn request_store_misses_after_ttl() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let cache = Arc::new(InMemoryCache::new(clock.clone()));
        let store = RequestStore::new(cache);

        store.store("u1", &message(), clock.utc_now()).await.unwrap();
        clock.advance(continuation_ttl() + Duration::seconds(1));
        assert!(store.load("u1").await.unwrap().is_none());
    }
}
