// src/abi_fetcher.rs

use crate::errors::{LensError, Result};
use crate::metrics;
use crate::rate_limiter::IntervalRateLimiter;
use crate::types::conversions::checksummed;
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::abi::Abi;
use ethers::types::Address;
use log::{debug, warn};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

/// Source of contract interface descriptions.
#[async_trait]
pub trait AbiSource: Send + Sync {
    async fn fetch(&self, address: Address) -> Result<Arc<Abi>>;
}

/// Etherscan-style `{status, message, result}` envelope.
#[derive(Debug, Deserialize)]
struct ExplorerEnvelope {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

/// Extracts the interface from an explorer response body.
///
/// The envelope's `status` decides success, not the mere presence of `result`:
/// on failure `result` carries a human-readable reason
/// ("Contract source code not verified", "Invalid API Key", ...).
pub fn parse_abi_response(address: Address, body: &str) -> Result<Abi> {
    let envelope: ExplorerEnvelope =
        serde_json::from_str(body).map_err(|e| LensError::Transport {
            service: "explorer",
            reason: format!("response is not an explorer envelope: {e}"),
        })?;

    if envelope.status != "1" {
        let reason = match envelope.result {
            serde_json::Value::String(reason) if !reason.is_empty() => reason,
            _ => envelope.message,
        };
        return Err(LensError::Lookup {
            address: checksummed(&address),
            reason,
        });
    }

    let abi: Abi = match envelope.result {
        serde_json::Value::String(raw) => serde_json::from_str::<Abi>(&raw),
        other => serde_json::from_value::<Abi>(other),
    }
    .map_err(|e| LensError::Decode(format!("interface for {}: {e}", checksummed(&address))))?;

    if abi.functions.is_empty() && abi.events.is_empty() && abi.constructor.is_none() {
        return Err(LensError::Lookup {
            address: checksummed(&address),
            reason: "explorer returned an empty interface".to_string(),
        });
    }

    Ok(abi)
}

/// Fetches verified ABIs from an Etherscan-compatible explorer.
///
/// Every request first waits on the shared [`IntervalRateLimiter`]. Nothing is
/// retried: a failed lookup is reported to the caller.
pub struct EtherscanAbiFetcher {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    limiter: Arc<IntervalRateLimiter>,
}

impl EtherscanAbiFetcher {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
        limiter: Arc<IntervalRateLimiter>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| LensError::Transport {
            service: "explorer",
            reason: format!("invalid base url {base_url}: {e}"),
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LensError::Transport {
                service: "explorer",
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            limiter,
        })
    }

    /// `getabi` URL for `address`.
    pub fn abi_url(&self, address: Address) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("module", "contract")
            .append_pair("action", "getabi")
            .append_pair("address", &checksummed(&address))
            .append_pair("apikey", &self.api_key);
        url
    }
}

#[async_trait]
impl AbiSource for EtherscanAbiFetcher {
    async fn fetch(&self, address: Address) -> Result<Arc<Abi>> {
        self.limiter.acquire().await;
        debug!("Fetching ABI for {}", checksummed(&address));

        let response = self
            .client
            .get(self.abi_url(address))
            .send()
            .await
            .map_err(|e| {
                metrics::increment_abi_fetch("transport_error");
                LensError::Transport {
                    service: "explorer",
                    reason: format!("request for {} failed: {e}", checksummed(&address)),
                }
            })?;

        if !response.status().is_success() {
            metrics::increment_abi_fetch("http_error");
            return Err(LensError::Transport {
                service: "explorer",
                reason: format!("HTTP error: {}", response.status()),
            });
        }

        let body = response.text().await.map_err(|e| LensError::Transport {
            service: "explorer",
            reason: format!("reading body failed: {e}"),
        })?;

        match parse_abi_response(address, &body) {
            Ok(abi) => {
                metrics::increment_abi_fetch("ok");
                Ok(Arc::new(abi))
            }
            Err(e) => {
                warn!("ABI lookup for {} failed: {}", checksummed(&address), e);
                metrics::increment_abi_fetch("lookup_error");
                Err(e)
            }
        }
    }
}

/// Memoizes interfaces per *implementation* address for the life of the process.
///
/// Implementation bytecode is immutable, so an entry never goes stale. Proxy
/// upgrades are picked up because proxies are re-resolved on every lookup and
/// a new implementation is a new key. Concurrent lookups of one address share
/// a single in-flight request. Failures are not cached.
pub struct CachingAbiSource<S> {
    inner: S,
    cache: DashMap<Address, Arc<OnceCell<Arc<Abi>>>>,
}

impl<S: AbiSource> CachingAbiSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    /// Number of interfaces held (in-flight and failed lookups excluded).
    pub fn len(&self) -> usize {
        self.cache
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalidate(&self, address: &Address) {
        self.cache.remove(address);
    }

    fn slot(&self, address: Address) -> Arc<OnceCell<Arc<Abi>>> {
        Arc::clone(
            self.cache
                .entry(address)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        )
    }
}

#[async_trait]
impl<S: AbiSource> AbiSource for CachingAbiSource<S> {
    async fn fetch(&self, address: Address) -> Result<Arc<Abi>> {
        let slot = self.slot(address);
        if let Some(abi) = slot.get() {
            metrics::increment_cache_hit("abi");
            return Ok(Arc::clone(abi));
        }
        metrics::increment_cache_miss("abi");

        let abi = slot
            .get_or_try_init(|| self.inner.fetch(address))
            .await?;
        Ok(Arc::clone(abi))
    }
}
