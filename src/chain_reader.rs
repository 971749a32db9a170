// src/chain_reader.rs

//! Read-only access to chain state.
//!
//! The pipeline only ever needs two primitives: reading a raw storage word and
//! calling a view function. [`ChainReader`] is that seam; [`EthersChainReader`]
//! implements it over any ethers `Middleware`.

use crate::errors::{LensError, Result};
use crate::metrics;
use crate::types::conversions::checksummed;
use async_trait::async_trait;
use ethers::abi::{Abi, Token};
use ethers::middleware::Middleware;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, H256};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

type DefaultDirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Raw 32-byte word stored at `slot` of `address`.
    async fn read_storage(&self, address: Address, slot: H256) -> Result<H256>;

    /// Calls the view function `method` of `address`, typed by `abi`.
    async fn call(
        &self,
        address: Address,
        abi: &Abi,
        method: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Token>>;
}

/// Looks a function up by name, mapping absence to `UnknownMethod`.
pub fn find_function<'a>(
    abi: &'a Abi,
    address: Address,
    method: &str,
) -> Result<&'a ethers::abi::Function> {
    abi.function(method).map_err(|_| LensError::UnknownMethod {
        address: checksummed(&address),
        method: method.to_string(),
    })
}

/// `ChainReader` backed by an ethers provider, throttled to a fixed QPS.
pub struct EthersChainReader<M: Middleware> {
    provider: Arc<M>,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl<M: Middleware + 'static> EthersChainReader<M> {
    pub fn new(provider: Arc<M>, qps_limit: u32) -> Result<Self> {
        let qps = NonZeroU32::new(qps_limit).ok_or_else(|| LensError::Transport {
            service: "rpc",
            reason: "QPS must be non-zero".to_string(),
        })?;

        Ok(Self {
            provider,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(qps))),
        })
    }

    pub fn provider(&self) -> Arc<M> {
        Arc::clone(&self.provider)
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainReader for EthersChainReader<M> {
    async fn read_storage(&self, address: Address, slot: H256) -> Result<H256> {
        self.limiter.until_ready().await;
        let start = Instant::now();
        metrics::increment_chain_read("eth_getStorageAt");

        let word = self
            .provider
            .get_storage_at(address, slot, None)
            .await
            .map_err(|e| LensError::Chain {
                address: checksummed(&address),
                reason: e.to_string(),
            })?;

        debug!(
            "[RPC_TRACE] eth_getStorageAt {} slot={:?} duration={:?}",
            checksummed(&address),
            slot,
            start.elapsed()
        );
        Ok(word)
    }

    async fn call(
        &self,
        address: Address,
        abi: &Abi,
        method: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Token>> {
        let function = find_function(abi, address, method)?;
        let calldata = function
            .encode_input(&args)
            .map_err(|e| LensError::Decode(format!("encoding {method} input: {e}")))?;

        let tx_request = TransactionRequest::new().to(address).data(calldata);
        let typed_tx: TypedTransaction = tx_request.into();

        self.limiter.until_ready().await;
        let start = Instant::now();
        metrics::increment_chain_read("eth_call");

        let response = self
            .provider
            .call(&typed_tx, None)
            .await
            .map_err(|e| LensError::Chain {
                address: checksummed(&address),
                reason: format!("{method}: {e}"),
            })?;

        debug!(
            "[RPC_TRACE] eth_call {}.{} duration={:?}",
            checksummed(&address),
            method,
            start.elapsed()
        );

        function
            .decode_output(&response)
            .map_err(|e| LensError::Decode(format!("decoding {method} output: {e}")))
    }
}
