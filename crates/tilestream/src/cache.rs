//! Byte caches for fetched manifests and tile payloads.
//!
//! # Implementations
//!
//! - [`MemoryCache`]: In-memory cache with an optional byte budget
//! - [`NoCache`]: Passthrough implementation that caches nothing

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Error, Result};

/// Future type for cache get operations.
pub type GetFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + 'a>>;

/// Future type for cache put/remove/clear operations.
pub type CacheFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A cache of raw bytes keyed by URL.
pub trait Cache: Send + Sync {
    /// Get data from the cache.
    ///
    /// Returns `Ok(None)` on a miss.
    fn get(&self, url: &str) -> GetFuture<'_>;

    /// Store data for a URL, replacing any previous entry.
    fn put(&self, url: &str, data: Vec<u8>) -> CacheFuture<'_>;

    /// Remove the entry for a URL, if any.
    fn remove(&self, url: &str) -> CacheFuture<'_>;

    /// Remove every entry.
    fn clear(&self) -> CacheFuture<'_>;
}

/// A cache that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl Cache for NoCache {
    fn get(&self, _url: &str) -> GetFuture<'_> {
        Box::pin(async { Ok(None) })
    }

    fn put(&self, _url: &str, _data: Vec<u8>) -> CacheFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn remove(&self, _url: &str) -> CacheFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn clear(&self) -> CacheFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// Hit and miss counters of a [`MemoryCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries dropped to stay within the byte budget.
    pub evictions: u64,
}

/// An in-memory cache shared between clones.
///
/// With a byte budget, the least recently used entries are evicted
/// first. An entry larger than the whole budget is not stored.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<MemoryCacheInner>>,
    max_bytes: Option<usize>,
}

#[derive(Debug, Default)]
struct MemoryCacheInner {
    entries: HashMap<String, Vec<u8>>,
    order: VecDeque<String>,
    bytes: usize,
    stats: CacheStats,
}

impl MemoryCacheInner {
    fn take(&mut self, url: &str) -> Option<Vec<u8>> {
        let data = self.entries.remove(url)?;
        self.bytes -= data.len();
        self.order.retain(|k| k != url);
        Some(data)
    }
}

fn poisoned<T>(operation: &'static str) -> impl FnOnce(PoisonError<T>) -> Error {
    move |e| Error::Cache {
        operation,
        message: e.to_string(),
    }
}

impl MemoryCache {
    /// Create an unbounded cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache that holds at most `max_bytes` of data.
    #[must_use]
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            inner: Arc::default(),
            max_bytes: Some(max_bytes),
        }
    }

    /// Bytes currently stored.
    pub fn size(&self) -> Result<usize> {
        Ok(self.inner.read().map_err(poisoned("size"))?.bytes)
    }

    /// Number of entries.
    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.read().map_err(poisoned("len"))?.entries.len())
    }

    /// Whether the cache holds nothing.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Hit, miss and eviction counters.
    pub fn stats(&self) -> Result<CacheStats> {
        Ok(self.inner.read().map_err(poisoned("stats"))?.stats)
    }

    fn get_now(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.write().map_err(poisoned("get"))?;
        let data = inner.entries.get(url).cloned();
        if data.is_some() {
            inner.order.retain(|key| key != url);
            inner.order.push_back(url.to_string());
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        Ok(data)
    }

    fn put_now(&self, url: &str, data: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned("put"))?;
        inner.take(url);

        if let Some(max_bytes) = self.max_bytes {
            if data.len() > max_bytes {
                tracing::debug!(url, size = data.len(), "entry exceeds cache budget");
                return Ok(());
            }
            while inner.bytes + data.len() > max_bytes {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                if let Some(old) = inner.entries.remove(&oldest) {
                    inner.bytes -= old.len();
                    inner.stats.evictions += 1;
                }
            }
        }

        inner.bytes += data.len();
        inner.order.push_back(url.to_string());
        inner.entries.insert(url.to_string(), data);
        Ok(())
    }
}

impl Cache for MemoryCache {
    fn get(&self, url: &str) -> GetFuture<'_> {
        let result = self.get_now(url);
        Box::pin(async move { result })
    }

    fn put(&self, url: &str, data: Vec<u8>) -> CacheFuture<'_> {
        let result = self.put_now(url, data);
        Box::pin(async move { result })
    }

    fn remove(&self, url: &str) -> CacheFuture<'_> {
        let result = self
            .inner
            .write()
            .map_err(poisoned("remove"))
            .map(|mut inner| {
                inner.take(url);
            });
        Box::pin(async move { result })
    }

    fn clear(&self) -> CacheFuture<'_> {
        let result = self
            .inner
            .write()
            .map_err(poisoned("clear"))
            .map(|mut inner| {
                inner.entries.clear();
                inner.order.clear();
                inner.bytes = 0;
            });
        Box::pin(async move { result })
    }
}
