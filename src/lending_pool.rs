// src/lending_pool.rs

//! End-to-end reads against an Aave V3 pool proxy.
//!
//! The pool is itself an upgradeable proxy, so its interface is resolved
//! through the [`ContractDirectory`] like any other contract. Reserve tokens
//! are resolved too (many of them are proxies as well, e.g. USDC).

use crate::abi_fetcher::{AbiSource, CachingAbiSource, EtherscanAbiFetcher};
use crate::batch_aggregator::BatchAggregator;
use crate::chain_reader::{ChainReader, EthersChainReader};
use crate::contract_directory::{ContractDirectory, ContractHandle};
use crate::errors::{LensError, Result};
use crate::rate_limiter::IntervalRateLimiter;
use crate::settings::Settings;
use crate::types::conversions::{checksummed, string_to_address};
use crate::types::{AccountSnapshot, ReserveSnapshot};
use ethers::abi::Token;
use ethers::prelude::{Http, Provider};
use ethers::types::Address;
use indexmap::IndexMap;
use log::{info, warn};
use std::sync::Arc;

pub struct LendingPoolReader {
    aggregator: BatchAggregator,
    pool_proxy: Address,
}

impl LendingPoolReader {
    pub fn new(aggregator: BatchAggregator, pool_proxy: Address) -> Self {
        Self {
            aggregator,
            pool_proxy,
        }
    }

    /// Wires the production stack: HTTP provider, rate-limited explorer, optional ABI cache.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let provider = Provider::<Http>::try_from(settings.rpc.http_url.as_str()).map_err(|e| {
            LensError::Transport {
                service: "rpc",
                reason: format!("invalid RPC url {}: {e}", settings.rpc.http_url),
            }
        })?;
        let reader: Arc<dyn ChainReader> =
            Arc::new(EthersChainReader::new(Arc::new(provider), settings.rpc.qps_limit)?);

        let limiter = Arc::new(IntervalRateLimiter::new(settings.explorer.min_interval()));
        let fetcher = EtherscanAbiFetcher::new(
            &settings.explorer.base_url,
            settings.explorer.api_key.clone(),
            settings.explorer.timeout(),
            limiter,
        )?;
        let abi_source: Arc<dyn AbiSource> = if settings.abi_cache.enabled {
            Arc::new(CachingAbiSource::new(fetcher))
        } else {
            Arc::new(fetcher)
        };

        let directory = Arc::new(ContractDirectory::new(reader, abi_source));
        let aggregator = BatchAggregator::new(directory)
            .with_max_concurrency(settings.batch.max_concurrency)
            .with_timeout(settings.batch.call_timeout());

        let pool_proxy = string_to_address(&settings.aave.pool_proxy)?;
        Ok(Self::new(aggregator, pool_proxy))
    }

    pub fn aggregator(&self) -> &BatchAggregator {
        &self.aggregator
    }

    pub fn pool_proxy(&self) -> Address {
        self.pool_proxy
    }

    /// Handle on the pool proxy, typed with its current implementation's interface.
    pub async fn pool(&self) -> Result<ContractHandle> {
        self.aggregator
            .directory()
            .get_contract(self.pool_proxy)
            .await
    }

    pub async fn reserves_list(&self, pool: &ContractHandle) -> Result<Vec<Address>> {
        let output = pool.call("getReservesList", Vec::new()).await?;
        match output.into_iter().next() {
            Some(Token::Array(items)) => items
                .into_iter()
                .map(|item| {
                    item.into_address().ok_or_else(|| {
                        LensError::Decode("getReservesList returned a non-address item".to_string())
                    })
                })
                .collect(),
            _ => Err(LensError::Decode(format!(
                "getReservesList of {} did not return an address array",
                checksummed(&pool.address())
            ))),
        }
    }

    /// Lend/borrow rates of every listed reserve, keyed by token name in reserve-list order.
    ///
    /// A reserve whose name is already taken is keyed as `"<name> (<address>)"`.
    pub async fn reserve_rates(&self) -> Result<IndexMap<String, ReserveSnapshot>> {
        let pool = self.pool().await?;
        let reserves = self.reserves_list(&pool).await?;
        info!("Pool {} lists {} reserves", checksummed(&pool.address()), reserves.len());

        let tokens = self.aggregator.get_contracts(&reserves).await?;
        let names = self.aggregator.get_token_names(&tokens).await?;
        let snapshots = self.aggregator.get_reserve_snapshots(&pool, &reserves).await?;

        let mut rates = IndexMap::with_capacity(snapshots.len());
        for (name, snapshot) in names.into_iter().zip(snapshots) {
            let key = if rates.contains_key(&name) {
                let disambiguated = format!("{} ({})", name, checksummed(&snapshot.asset));
                warn!("Reserve name {:?} is not unique, keying as {:?}", name, disambiguated);
                disambiguated
            } else {
                name
            };
            rates.insert(key, snapshot);
        }
        Ok(rates)
    }

    /// Position summary for each borrower, in input order.
    pub async fn account_health(&self, accounts: &[Address]) -> Result<Vec<AccountSnapshot>> {
        let pool = self.pool().await?;
        self.aggregator.get_account_snapshots(&pool, accounts).await
    }
}
