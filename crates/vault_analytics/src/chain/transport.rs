//! HTTP transport shared by the JSON-RPC and GraphQL backends.
//!
//! One attempt per call: callers own the retry decision. Requests are spaced
//! by a minimum interval and immutable responses can be served from the cache.

use super::cache::Cache;
use super::error::{AdapterError, Backend};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, warn};
use url::Url;

const RATE_LIMIT_MS: u64 = 200;
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub rate_limit_ms: u64,
    pub timeout_secs: u64,
    /// Serve from cache only; never touch the network.
    pub offline: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: RATE_LIMIT_MS,
            timeout_secs: REQUEST_TIMEOUT_SECS,
            offline: false,
        }
    }
}

/// Rate-limited JSON POST client with an optional SQLite cache.
pub struct HttpTransport {
    backend: Backend,
    endpoint: Url,
    config: TransportConfig,
    client: Option<reqwest::Client>,
    cache: Option<Arc<Cache>>,
    last_request: Mutex<Option<OffsetDateTime>>,
    request_count: AtomicU64,
}

impl HttpTransport {
    pub fn new(
        backend: Backend,
        endpoint: Url,
        config: TransportConfig,
        cache: Option<Arc<Cache>>,
    ) -> Result<Self, AdapterError> {
        let client = if config.offline {
            None
        } else {
            Some(
                reqwest::Client::builder()
                    .use_rustls_tls()
                    .timeout(Duration::from_secs(config.timeout_secs))
                    .build()
                    .map_err(|source| AdapterError::Transport {
                        backend: backend.clone(),
                        source,
                    })?,
            )
        };
        Ok(Self {
            backend,
            endpoint,
            config,
            client,
            cache,
            last_request: Mutex::new(None),
            request_count: AtomicU64::new(0),
        })
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn rate_limit(&self) {
        let prev = *self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let sleep_ms = match prev {
            Some(prev) => {
                let elapsed = (OffsetDateTime::now_utc() - prev).whole_milliseconds();
                let need = i128::from(self.config.rate_limit_ms);
                u64::try_from((need - elapsed).max(0)).unwrap_or(0)
            }
            None => 0,
        };
        if sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
        *self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(OffsetDateTime::now_utc());
    }

    /// POST `body` and return the response text. When `cacheable`, a cached
    /// response is returned if present and a fresh one is stored.
    pub async fn post_json(
        &self,
        body: &serde_json::Value,
        cacheable: bool,
    ) -> Result<String, AdapterError> {
        let endpoint = self.endpoint.as_str();
        if cacheable {
            if let Some(cache) = &self.cache {
                let hit = cache
                    .lookup(endpoint, body)
                    .map_err(|source| AdapterError::Cache {
                        backend: self.backend.clone(),
                        source,
                    })?;
                if let Some(cached) = hit {
                    debug!(endpoint, "cache hit");
                    return Ok(cached);
                }
            }
        }

        let client = self.client.as_ref().ok_or_else(|| AdapterError::OfflineMiss {
            backend: self.backend.clone(),
        })?;
        self.rate_limit().await;

        let res = client
            .post(self.endpoint.clone())
            .json(body)
            .send()
            .await
            .map_err(|source| AdapterError::Transport {
                backend: self.backend.clone(),
                source,
            })?;
        let status = res.status();
        let text = res.text().await.map_err(|source| AdapterError::Transport {
            backend: self.backend.clone(),
            source,
        })?;
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if !status.is_success() {
            return Err(AdapterError::Status {
                backend: self.backend.clone(),
                status: status.as_u16(),
                body: text,
            });
        }
        if cacheable {
            if let Some(cache) = &self.cache {
                if let Err(error) = cache.store(endpoint, body, &text) {
                    warn!(%error, "cache write failed");
                }
            }
        }
        Ok(text)
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offline_serves_cached_and_misses_otherwise() {
        let cache = Arc::new(Cache::in_memory().unwrap());
        let endpoint = Url::parse("http://127.0.0.1:8545/").unwrap();
        let body = serde_json::json!({"method":"eth_getBlockByNumber","params":["0x1",false]});
        cache
            .store(endpoint.as_str(), &body, r#"{"result":{}}"#)
            .unwrap();
        let transport = HttpTransport::new(
            Backend::live_log(&endpoint),
            endpoint,
            TransportConfig {
                offline: true,
                ..Default::default()
            },
            Some(cache),
        )
        .unwrap();
        assert_eq!(
            transport.post_json(&body, true).await.unwrap(),
            r#"{"result":{}}"#
        );
        let other = serde_json::json!({"method":"eth_blockNumber","params":[]});
        assert!(matches!(
            transport.post_json(&other, false).await,
            Err(AdapterError::OfflineMiss { .. })
        ));
        assert_eq!(transport.request_count(), 0);
    }
}
