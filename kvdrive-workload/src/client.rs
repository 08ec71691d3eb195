//! Store client abstraction.
//!
//! The engine talks to the key-value store only through [`StoreClient`]. A
//! network client for a real cluster implements the trait outside this crate;
//! [`MemoryStoreClient`] is an in-process store with the same TTL semantics,
//! used for dry runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::key::derive_key;
use crate::record_store::{unix_now, RecordContext};

/// TTL applied by [`MemoryStoreClient`] when a request carries none.
pub const DEFAULT_TTL_SECS: u32 = 1_800;

/// Errors reported by a store client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The key does not exist or has expired.
    #[error("no key")]
    NoKey,

    /// A create hit an existing key.
    #[error("unique key violation")]
    UniqueKeyViolation,

    /// The request did not complete in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Store-specific failure with a status code.
    #[error("{message}")]
    Rejected {
        /// Store status code.
        code: i16,
        /// Error message.
        message: String,
    },
}

impl ClientError {
    /// Returns a numeric status code for reporting.
    #[must_use]
    pub const fn error_code(&self) -> i16 {
        match self {
            Self::NoKey => -1,
            Self::UniqueKeyViolation => -2,
            Self::Timeout(_) => -3,
            Self::Unavailable(_) => -4,
            Self::Rejected { code, .. } => *code,
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// TTL override in seconds; 0 leaves the store default (or, for reads,
    /// leaves the current TTL untouched).
    pub ttl: u32,
}

impl RequestOptions {
    /// Options carrying a TTL.
    #[must_use]
    pub const fn with_ttl(ttl: u32) -> Self {
        Self { ttl }
    }
}

/// Client operations the workload engine issues.
///
/// Calls are assumed to enforce their own timeouts.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Inserts a new key.
    async fn create(
        &self,
        key: Bytes,
        payload: Bytes,
        options: RequestOptions,
    ) -> Result<RecordContext, ClientError>;

    /// Reads a key. A non-zero TTL extends the key's lifetime.
    async fn get(
        &self,
        key: Bytes,
        options: RequestOptions,
    ) -> Result<(Bytes, RecordContext), ClientError>;

    /// Overwrites an existing key.
    async fn update(
        &self,
        key: Bytes,
        payload: Bytes,
        options: RequestOptions,
    ) -> Result<RecordContext, ClientError>;

    /// Inserts or overwrites a key.
    async fn set(
        &self,
        key: Bytes,
        payload: Bytes,
        options: RequestOptions,
    ) -> Result<RecordContext, ClientError>;

    /// Removes a key.
    async fn destroy(&self, key: Bytes) -> Result<(), ClientError>;
}

#[async_trait]
impl<C: StoreClient + ?Sized> StoreClient for Arc<C> {
    async fn create(
        &self,
        key: Bytes,
        payload: Bytes,
        options: RequestOptions,
    ) -> Result<RecordContext, ClientError> {
        (**self).create(key, payload, options).await
    }

    async fn get(
        &self,
        key: Bytes,
        options: RequestOptions,
    ) -> Result<(Bytes, RecordContext), ClientError> {
        (**self).get(key, options).await
    }

    async fn update(
        &self,
        key: Bytes,
        payload: Bytes,
        options: RequestOptions,
    ) -> Result<RecordContext, ClientError> {
        (**self).update(key, payload, options).await
    }

    async fn set(
        &self,
        key: Bytes,
        payload: Bytes,
        options: RequestOptions,
    ) -> Result<RecordContext, ClientError> {
        (**self).set(key, payload, options).await
    }

    async fn destroy(&self, key: Bytes) -> Result<(), ClientError> {
        (**self).destroy(key).await
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    payload: Bytes,
    context: RecordContext,
}

/// Counters of requests served by a [`MemoryStoreClient`].
#[derive(Debug, Default)]
pub struct MemoryStoreCounters {
    /// Create requests.
    pub creates: AtomicU64,
    /// Get requests.
    pub gets: AtomicU64,
    /// Update requests.
    pub updates: AtomicU64,
    /// Set requests.
    pub sets: AtomicU64,
    /// Destroy requests.
    pub destroys: AtomicU64,
}

/// In-process key-value store with TTL expiry.
#[derive(Debug, Default)]
pub struct MemoryStoreClient {
    entries: RwLock<HashMap<Bytes, StoredValue>>,
    counters: MemoryStoreCounters,
}

impl MemoryStoreClient {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the derived keys `[offset, offset + count)` with no expiry pressure.
    pub async fn preload(&self, offset: u64, count: u64, payload: Bytes) {
        let now = unix_now();
        let mut entries = self.entries.write().await;
        for i in 0..count {
            entries.insert(
                derive_key(offset.wrapping_add(i)),
                StoredValue {
                    payload: payload.clone(),
                    context: RecordContext::new(now, u32::MAX),
                },
            );
        }
    }

    /// Returns the number of live (unexpired) keys.
    pub async fn live_keys(&self) -> usize {
        let now = unix_now();
        self.entries
            .read()
            .await
            .values()
            .filter(|v| !v.context.is_expired_at(now))
            .count()
    }

    /// Returns true if `key` is present and unexpired.
    pub async fn contains(&self, key: &[u8]) -> bool {
        let now = unix_now();
        self.entries
            .read()
            .await
            .get(key)
            .is_some_and(|v| !v.context.is_expired_at(now))
    }

    /// Returns the request counters.
    #[must_use]
    pub const fn counters(&self) -> &MemoryStoreCounters {
        &self.counters
    }

    const fn effective_ttl(ttl: u32) -> u32 {
        if ttl == 0 {
            DEFAULT_TTL_SECS
        } else {
            ttl
        }
    }
}

#[async_trait]
impl StoreClient for MemoryStoreClient {
    async fn create(
        &self,
        key: Bytes,
        payload: Bytes,
        options: RequestOptions,
    ) -> Result<RecordContext, ClientError> {
        self.counters.creates.fetch_add(1, Ordering::Relaxed);
        let now = unix_now();
        let mut entries = self.entries.write().await;
        if entries
            .get(&key)
            .is_some_and(|v| !v.context.is_expired_at(now))
        {
            return Err(ClientError::UniqueKeyViolation);
        }
        let context = RecordContext::new(now, Self::effective_ttl(options.ttl));
        entries.insert(key, StoredValue { payload, context });
        Ok(context)
    }

    async fn get(
        &self,
        key: Bytes,
        options: RequestOptions,
    ) -> Result<(Bytes, RecordContext), ClientError> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        let now = unix_now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(&key) {
            Some(value) if !value.context.is_expired_at(now) => {
                if options.ttl > 0 {
                    let remaining = value.context.expires_at().saturating_sub(now);
                    if u64::from(options.ttl) > remaining {
                        let age = now.saturating_sub(value.context.creation_time);
                        value.context.time_to_live =
                            u32::try_from(age + u64::from(options.ttl)).unwrap_or(u32::MAX);
                    }
                }
                Ok((value.payload.clone(), value.context))
            }
            _ => Err(ClientError::NoKey),
        }
    }

    async fn update(
        &self,
        key: Bytes,
        payload: Bytes,
        options: RequestOptions,
    ) -> Result<RecordContext, ClientError> {
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        let now = unix_now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(&key) {
            Some(value) if !value.context.is_expired_at(now) => {
                value.payload = payload;
                if options.ttl > 0 {
                    let age = now.saturating_sub(value.context.creation_time);
                    value.context.time_to_live =
                        u32::try_from(age + u64::from(options.ttl)).unwrap_or(u32::MAX);
                }
                Ok(value.context)
            }
            _ => Err(ClientError::NoKey),
        }
    }

    async fn set(
        &self,
        key: Bytes,
        payload: Bytes,
        options: RequestOptions,
    ) -> Result<RecordContext, ClientError> {
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        let now = unix_now();
        let mut entries = self.entries.write().await;
        let context = match entries.get(&key) {
            Some(value) if !value.context.is_expired_at(now) => {
                let mut context = value.context;
                if options.ttl > 0 {
                    let age = now.saturating_sub(context.creation_time);
                    context.time_to_live =
                        u32::try_from(age + u64::from(options.ttl)).unwrap_or(u32::MAX);
                }
                context
            }
            _ => RecordContext::new(now, Self::effective_ttl(options.ttl)),
        };
        entries.insert(key, StoredValue { payload, context });
        Ok(context)
    }

    async fn destroy(&self, key: Bytes) -> Result<(), ClientError> {
        self.counters.destroys.fetch_add(1, Ordering::Relaxed);
        self.entries.write().await.remove(&key);
        Ok(())
    }
}
