//! Byte fetching for manifests and tile payloads.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::LocalBoxFuture;
use crate::cache::{Cache, NoCache};
use crate::error::{Error, Result};

/// Fetches raw bytes by URL.
pub trait Fetcher {
    /// Fetch the bytes behind `url`.
    fn fetch<'a>(&'a self, url: &'a str) -> LocalBoxFuture<'a, Result<Vec<u8>>>;
}

/// HTTP fetcher backed by `reqwest`, with a pluggable cache.
///
/// Works on desktop and WASM; on the web reqwest uses the browser's fetch.
pub struct HttpFetcher<C: Cache = NoCache> {
    http: reqwest::Client,
    cache: Arc<C>,
}

impl HttpFetcher<NoCache> {
    /// Create a fetcher that caches nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cache(NoCache)
    }
}

impl Default for HttpFetcher<NoCache> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Cache> HttpFetcher<C> {
    /// Create a fetcher with a custom cache.
    #[must_use]
    pub fn with_cache(cache: C) -> Self {
        Self {
            http: reqwest::Client::new(),
            cache: Arc::new(cache),
        }
    }

    /// Create a fetcher with a custom HTTP client and cache.
    #[must_use]
    pub fn with_http_and_cache(http: reqwest::Client, cache: C) -> Self {
        Self {
            http,
            cache: Arc::new(cache),
        }
    }

    /// The cache in use.
    #[must_use]
    pub fn cache(&self) -> &C {
        &self.cache
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        // Check cache first.
        if let Some(data) = self.cache.get(url).await? {
            tracing::debug!(url, "cache hit");
            return Ok(data);
        }

        tracing::debug!(url, "fetching");

        let response = self.http.get(url).send().await.map_err(|e| Error::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let data = response.bytes().await.map_err(|e| Error::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let data = data.to_vec();

        // A failed cache write only costs a refetch later.
        if let Err(e) = self.cache.put(url, data.clone()).await {
            tracing::warn!(url, "failed to cache response: {}", e);
        }

        Ok(data)
    }
}

impl<C: Cache> Fetcher for HttpFetcher<C> {
    fn fetch<'a>(&'a self, url: &'a str) -> LocalBoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(self.fetch_bytes(url))
    }
}

impl<C: Cache> std::fmt::Debug for HttpFetcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher").finish_non_exhaustive()
    }
}

/// Serves payloads from memory. Unknown URLs fail like a 404.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    payloads: RefCell<HashMap<String, Vec<u8>>>,
    requests: RefCell<Vec<String>>,
}

impl MemoryFetcher {
    /// Create an empty fetcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` for `url`.
    pub fn insert(&self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.payloads.borrow_mut().insert(url.into(), bytes.into());
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with(self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(url, bytes);
        self
    }

    /// Stop serving `url`.
    pub fn remove(&self, url: &str) {
        self.payloads.borrow_mut().remove(url);
    }

    /// How many times `url` was requested.
    #[must_use]
    pub fn request_count(&self, url: &str) -> usize {
        self.requests.borrow().iter().filter(|r| *r == url).count()
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> LocalBoxFuture<'a, Result<Vec<u8>>> {
        self.requests.borrow_mut().push(url.to_string());
        let result = self
            .payloads
            .borrow()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::HttpStatus {
                url: url.to_string(),
                status: 404,
            });
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_fetcher() {
        let fetcher = MemoryFetcher::new().with("mem://a", b"abc".to_vec());
        assert_eq!(fetcher.fetch("mem://a").await.unwrap(), b"abc");

        let err = fetcher.fetch("mem://missing").await.unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 404, .. }));
        assert!(err.is_transient());

        fetcher.remove("mem://a");
        assert!(fetcher.fetch("mem://a").await.is_err());
        assert_eq!(fetcher.request_count("mem://a"), 2);
    }

    #[tokio::test]
    async fn test_http_fetcher_serves_cached_bytes() {
        let cache = crate::cache::MemoryCache::new();
        // Unroutable URL: only the cache can answer.
        let url = "http://127.0.0.1:9/tileset.json";
        cache.put(url, b"{}".to_vec()).await.unwrap();

        let fetcher = HttpFetcher::with_cache(cache);
        assert_eq!(fetcher.fetch(url).await.unwrap(), b"{}");
        assert_eq!(fetcher.cache().stats().unwrap().hits, 1);
    }
}
