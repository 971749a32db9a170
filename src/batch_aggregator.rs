// src/batch_aggregator.rs

use crate::contract_directory::{ContractDirectory, ContractHandle};
use crate::errors::{LensError, Result};
use crate::metrics;
use crate::types::conversions::checksummed;
use crate::types::{AccountSnapshot, RawAccountData, RawReserveData, ReserveSnapshot};
use ethers::abi::Token;
use ethers::types::Address;
use futures::stream::{self, StreamExt};
use log::{info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_MAX_CONCURRENCY: usize = 32;

// Some early tokens (MKR, SAI) return bytes32 from name()
fn token_to_name(token: Token) -> Option<String> {
    match token {
        Token::String(name) => Some(name),
        Token::FixedBytes(raw) => Some(
            String::from_utf8_lossy(&raw)
                .trim_end_matches('\0')
                .to_string(),
        ),
        _ => None,
    }
}

/// Concurrent, order-preserving fan-out over contract lookups and view calls.
///
/// Every operation launches one task per input element (at most
/// `max_concurrency` in flight) and writes each result into the slot of the
/// element it came from, so output `i` always belongs to input `i` whatever
/// the completion order.
///
/// Batches are all-or-nothing: the first failing element aborts the batch and
/// is reported as [`LensError::Batch`] with its index and address. Remaining
/// in-flight work is dropped.
pub struct BatchAggregator {
    directory: Arc<ContractDirectory>,
    max_concurrency: usize,
    element_timeout: Option<Duration>,
}

impl BatchAggregator {
    pub fn new(directory: Arc<ContractDirectory>) -> Self {
        Self {
            directory,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            element_timeout: None,
        }
    }

    /// Upper bound on concurrently running elements (minimum 1).
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Per-element deadline. `None` waits indefinitely.
    ///
    /// The clock starts when an element enters the `max_concurrency` window,
    /// so time spent queued behind other elements is not charged. Waits inside
    /// the element are: in `get_contracts` that includes the shared explorer
    /// rate limiter, which on a cold cache can add up to roughly
    /// `batch length x min_interval` for the last element. Size the deadline
    /// for that, or lower `max_concurrency` so fewer elements queue on the
    /// limiter at once.
    pub fn with_timeout(mut self, element_timeout: Option<Duration>) -> Self {
        self.element_timeout = element_timeout;
        self
    }

    pub fn directory(&self) -> &ContractDirectory {
        &self.directory
    }

    /// Runs `make(i, targets[i])` for every element and returns results by index.
    async fn run_indexed<T, F, Fut>(
        &self,
        operation: &str,
        targets: Vec<Address>,
        make: F,
    ) -> Result<Vec<T>>
    where
        F: Fn(usize, Address) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let total = targets.len();
        metrics::record_batch_size(operation, total);
        if total == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let element_timeout = self.element_timeout;
        let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();

        let mut results = stream::iter(targets.into_iter().enumerate().map(|(index, address)| {
            let element = make(index, address);
            async move {
                let outcome = match element_timeout {
                    Some(limit) => match tokio::time::timeout(limit, element).await {
                        Ok(outcome) => outcome,
                        Err(_elapsed) => Err(LensError::Timeout {
                            operation: operation.to_string(),
                            address: checksummed(&address),
                            limit,
                        }),
                    },
                    None => element.await,
                };
                (index, address, outcome)
            }
        }))
        .buffer_unordered(self.max_concurrency);

        while let Some((index, address, outcome)) = results.next().await {
            match outcome {
                Ok(value) => slots[index] = Some(value),
                Err(e) => {
                    warn!(
                        "{}: element #{} ({}) failed, aborting batch of {}: {}",
                        operation,
                        index,
                        checksummed(&address),
                        total,
                        e
                    );
                    return Err(LensError::Batch {
                        index,
                        address: checksummed(&address),
                        source: Box::new(e),
                    });
                }
            }
        }

        info!(
            "{}: {} elements completed in {:?}",
            operation,
            total,
            start.elapsed()
        );

        slots
            .into_iter()
            .collect::<Option<Vec<T>>>()
            .ok_or_else(|| LensError::Decode(format!("{operation}: batch slot left unfilled")))
    }

    /// Builds one handle per address, resolving proxies concurrently.
    pub async fn get_contracts(&self, addresses: &[Address]) -> Result<Vec<ContractHandle>> {
        let directory: &ContractDirectory = &self.directory;
        self.run_indexed("get_contracts", addresses.to_vec(), move |_, address| {
            directory.get_contract(address)
        })
        .await
    }

    /// Calls `method` with the same `args` on every handle.
    pub async fn call_all(
        &self,
        handles: &[ContractHandle],
        method: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Vec<Token>>> {
        let targets = handles.iter().map(ContractHandle::address).collect();
        self.run_indexed(method, targets, move |index, _| {
            let handle = &handles[index];
            let args = args.clone();
            async move { handle.call(method, args).await }
        })
        .await
    }

    /// Calls `method(address)` on one shared handle for every address.
    pub async fn call_each(
        &self,
        handle: &ContractHandle,
        method: &str,
        addresses: &[Address],
    ) -> Result<Vec<Vec<Token>>> {
        self.run_indexed(method, addresses.to_vec(), move |_, address| {
            handle.call(method, vec![Token::Address(address)])
        })
        .await
    }

    /// ERC-20 `name()` of every token handle.
    pub async fn get_token_names(&self, handles: &[ContractHandle]) -> Result<Vec<String>> {
        let targets = handles.iter().map(ContractHandle::address).collect();
        self.run_indexed("name", targets, move |index, address| {
            let handle = &handles[index];
            async move {
                let output = handle.call("name", Vec::new()).await?;
                output
                    .into_iter()
                    .next()
                    .and_then(token_to_name)
                    .ok_or_else(|| {
                        LensError::Decode(format!("name() of {} is not a string", checksummed(&address)))
                    })
            }
        })
        .await
    }

    /// `getReserveData(asset)` for every asset against the shared pool handle.
    pub async fn get_reserve_snapshots(
        &self,
        pool: &ContractHandle,
        assets: &[Address],
    ) -> Result<Vec<ReserveSnapshot>> {
        self.run_indexed("getReserveData", assets.to_vec(), move |_, asset| async move {
            let output = pool
                .call("getReserveData", vec![Token::Address(asset)])
                .await?;
            let raw = RawReserveData::from_tokens(asset, output)?;
            Ok(ReserveSnapshot::try_from(raw)?)
        })
        .await
    }

    /// `getUserAccountData(account)` for every account against the shared pool handle.
    pub async fn get_account_snapshots(
        &self,
        pool: &ContractHandle,
        accounts: &[Address],
    ) -> Result<Vec<AccountSnapshot>> {
        self.run_indexed("getUserAccountData", accounts.to_vec(), move |_, account| async move {
            let output = pool
                .call("getUserAccountData", vec![Token::Address(account)])
                .await?;
            let raw = RawAccountData::from_tokens(account, output)?;
            Ok(AccountSnapshot::try_from(raw)?)
        })
        .await
    }
}
