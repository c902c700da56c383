//! Key/value store collaborator contract.
//!
//! The credit cache and the SSE operation bus persist through this interface.
//! Errors never propagate to request handlers: consumers treat every failure
//! as a cache miss or a skipped write.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Errors from the backing store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KvError {
    /// The store is unreachable or refused the operation.
    #[error("kv store unavailable: {0}")]
    Unavailable(String),
}

/// Summary statistics from the backing store.
#[derive(Debug, Clone, Default)]
pub struct KvInfo {
    pub keys: usize,
    pub backend: String,
}

/// Minimal key/value surface required by the gateway.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), KvError>;
    async fn delete(&self, key: &str) -> Result<(), KvError>;
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, KvError>;
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError>;
    async fn info(&self) -> Result<KvInfo, KvError>;
}

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

/// In-memory store with TTL tracking, for tests and single-node deployments.
///
/// The failure switch lets tests exercise the silent-degradation contract.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
    fail: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// When set, every operation fails with [`KvError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), KvError> {
        if self.fail.load(Ordering::Relaxed) {
            Err(KvError::Unavailable("injected kv outage".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), KvError> {
        self.check_available()?;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.check_available()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.is_expired());
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        self.check_available()?;
        Ok(self
            .entries
            .lock()
            .get(key)
            .filter(|entry| !entry.is_expired())
            .and_then(|entry| entry.remaining_ttl()))
    }

    async fn info(&self) -> Result<KvInfo, KvError> {
        self.check_available()?;
        Ok(KvInfo {
            keys: self.entries.lock().len(),
            backend: "memory".to_string(),
        })
    }
}
