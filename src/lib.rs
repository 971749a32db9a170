//! # Proxy Lens SDK
//!
//! Reads on-chain state through upgradeable proxies without hardcoding their
//! interfaces.
//!
//! ## Overview
//!
//! Given a contract address, the SDK:
//!
//! - **Resolves** the implementation installed behind it by probing known
//!   proxy storage-slot conventions (EIP-1967, legacy OpenZeppelin, beacon)
//! - **Fetches** that implementation's verified ABI from an Etherscan-style
//!   explorer, behind a shared minimum-interval rate limiter
//! - **Binds** the ABI to the *original* address, since the proxy owns the state
//! - **Batches** handle construction and view calls concurrently, returning
//!   results in input order
//!
//! On top of that sit Aave V3 reads (reserve rates, account health) with exact
//! ray/wad decimal conversion, and subgraph-based borrower discovery.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use proxy_lens_sdk::{LendingPoolReader, Settings};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::new()?;
//! let reader = LendingPoolReader::from_settings(&settings)?;
//! for (name, reserve) in reader.reserve_rates().await? {
//!     println!("{name}: lend {}% borrow {}%", reserve.lend_rate, reserve.borrow_rate);
//! }
//! # Ok(())
//! # }
//! ```

// Core pipeline
/// Minimum-interval limiter for explorer requests
pub mod rate_limiter;
/// Chain state access seam (storage reads, view calls)
pub mod chain_reader;
/// Proxy implementation discovery
pub mod proxy_resolver;
/// Explorer ABI fetching and caching
pub mod abi_fetcher;
/// Proxy-aware contract handles
pub mod contract_directory;
/// Order-preserving concurrent batches
pub mod batch_aggregator;

// Lending protocol reads
/// Aave V3 pool flows
pub mod lending_pool;
/// Borrower discovery via the Aave subgraph
pub mod subgraph;

// Common
pub mod errors;
pub mod metrics;
pub mod settings;
/// Fixed-point conversions and snapshots
pub mod types;

pub use abi_fetcher::{AbiSource, CachingAbiSource, EtherscanAbiFetcher};
pub use batch_aggregator::BatchAggregator;
pub use chain_reader::{ChainReader, EthersChainReader};
pub use contract_directory::{ContractDirectory, ContractHandle};
pub use errors::{LensError, Result};
pub use lending_pool::LendingPoolReader;
pub use proxy_resolver::{ImplementationRecord, ImplementationStrategy, ProxySlotResolver};
pub use rate_limiter::IntervalRateLimiter;
pub use settings::Settings;
