//! Cache storage: named buckets of request → response snapshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use exin_net::{Request, Response};
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::CacheError;

/// Cache key for a URL: the absolute URL without its fragment.
pub fn request_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

// ==================== Cache Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers in wire order, lower-cased names. Repeated headers
    /// keep one pair per value; values are raw bytes.
    pub headers: Vec<(String, Vec<u8>)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for `request`.
    pub fn from_response(request: &Request, response: &Response) -> Result<Self, CacheError> {
        if request.method != Method::GET {
            return Err(CacheError::UnsupportedMethod(request.method.to_string()));
        }

        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        Ok(Self {
            url: request_key(&request.url),
            method: request.method.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: now_millis(),
        })
    }

    /// Rebuild the stored response.
    pub fn to_response(&self) -> Result<Response, CacheError> {
        let url = Url::parse(&self.url).map_err(|e| CacheError::InvalidEntry(e.to_string()))?;
        let status =
            StatusCode::from_u16(self.status).map_err(|e| CacheError::InvalidEntry(e.to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CacheError::InvalidEntry(e.to_string()))?;
            let value =
                HeaderValue::from_bytes(value).map_err(|e| CacheError::InvalidEntry(e.to_string()))?;
            headers.append(name, value);
        }

        Ok(Response::new(url, status, headers, self.body.clone()))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==================== Cache ====================

/// A single named bucket.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries by request key.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request key.
    pub fn match_request(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store an entry under its own key, replacing any previous one.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Cache storage capability.
///
/// Implementations serialize concurrent access to the same key.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a bucket, creating it if missing.
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    /// Bucket names in creation order.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Check if a bucket exists.
    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Delete a bucket. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Match a request in one bucket.
    async fn match_in(&self, name: &str, request: &Request) -> Result<Option<Response>, CacheError>;

    /// Match a request across all buckets, oldest first.
    async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError>;

    /// Store a response, creating the bucket if needed.
    async fn put(&self, name: &str, request: &Request, response: &Response) -> Result<(), CacheError>;

    /// Store every pair or none of them.
    async fn put_all(&self, name: &str, pairs: &[(Request, Response)]) -> Result<(), CacheError>;

    /// Request keys stored in a bucket.
    async fn entries(&self, name: &str) -> Result<Vec<String>, CacheError>;
}

#[derive(Debug, Default)]
struct StorageInner {
    caches: HashMap<String, Cache>,
    order: Vec<String>,
}

impl StorageInner {
    fn open(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    fn delete(&mut self, name: &str) -> bool {
        self.order.retain(|n| n != name);
        self.caches.remove(name).is_some()
    }
}

/// In-process [`CacheStorage`].
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    inner: RwLock<StorageInner>,
    fail_writes: AtomicBool,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::WriteFailed("storage is read-only".to_string()));
        }
        Ok(())
    }

    /// Serialize one bucket to JSON.
    pub async fn snapshot(&self, name: &str) -> Result<String, CacheError> {
        let inner = self.inner.read().await;
        let cache = inner
            .caches
            .get(name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        Ok(serde_json::to_string(cache)?)
    }

    /// Restore a bucket from [`snapshot`](Self::snapshot) output, replacing
    /// any bucket with the same name.
    pub async fn restore(&self, json: &str) -> Result<String, CacheError> {
        self.check_writable()?;
        let cache: Cache = serde_json::from_str(json)?;
        let name = cache.name.clone();

        let mut inner = self.inner.write().await;
        *inner.open(&name) = cache;
        debug!(cache = %name, "Cache restored");
        Ok(name)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.inner.write().await.open(name);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.inner.read().await.order.clone())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.inner.read().await.caches.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        self.check_writable()?;
        let deleted = self.inner.write().await.delete(name);
        if deleted {
            debug!(cache = %name, "Cache deleted");
        }
        Ok(deleted)
    }

    async fn match_in(&self, name: &str, request: &Request) -> Result<Option<Response>, CacheError> {
        if request.method != Method::GET {
            return Ok(None);
        }
        let key = request_key(&request.url);
        let inner = self.inner.read().await;
        inner
            .caches
            .get(name)
            .and_then(|cache| cache.match_request(&key))
            .map(CacheEntry::to_response)
            .transpose()
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        if request.method != Method::GET {
            return Ok(None);
        }
        let key = request_key(&request.url);
        let inner = self.inner.read().await;
        for name in &inner.order {
            if let Some(entry) = inner.caches.get(name).and_then(|c| c.match_request(&key)) {
                trace!(cache = %name, key = %key, "Cache hit");
                return entry.to_response().map(Some);
            }
        }
        trace!(key = %key, "Cache miss");
        Ok(None)
    }

    async fn put(&self, name: &str, request: &Request, response: &Response) -> Result<(), CacheError> {
        self.check_writable()?;
        let entry = CacheEntry::from_response(request, response)?;
        self.inner.write().await.open(name).put(entry);
        Ok(())
    }

    async fn put_all(&self, name: &str, pairs: &[(Request, Response)]) -> Result<(), CacheError> {
        self.check_writable()?;
        let entries = pairs
            .iter()
            .map(|(request, response)| CacheEntry::from_response(request, response))
            .collect::<Result<Vec<_>, _>>()?;

        let mut inner = self.inner.write().await;
        let cache = inner.open(name);
        for entry in entries {
            cache.put(entry);
        }
        Ok(())
    }

    async fn entries(&self, name: &str) -> Result<Vec<String>, CacheError> {
        let inner = self.inner.read().await;
        let cache = inner
            .caches
            .get(name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        Ok(cache.keys().into_iter().map(str::to_string).collect())
    }
}
