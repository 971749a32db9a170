// src/proxy_resolver.rs

//! # Proxy implementation discovery
//!
//! Upgradeable proxies keep the address of their logic contract in a
//! well-known storage slot. Different proxy libraries picked different slots,
//! so resolution walks an ordered list of [`ImplementationStrategy`] values
//! and stops at the first one that yields a non-zero address.
//!
//! ## Default conventions (in precedence order)
//!
//! 1. **EIP-1967 logic slot**: `keccak256("eip1967.proxy.implementation") - 1`
//! 2. **OpenZeppelin unstructured storage** (pre EIP-1967):
//!    `keccak256("org.zeppelinos.proxy.implementation")`
//!
//! [`ProxySlotResolver::with_beacon`] appends the EIP-1967 beacon convention,
//! which reads the beacon address and asks it for `implementation()`.
//!
//! Chain reader failures are not part of the algorithm and propagate as-is.

use crate::chain_reader::ChainReader;
use crate::errors::{LensError, Result};
use crate::metrics;
use crate::types::conversions::checksummed;
use async_trait::async_trait;
use ethers::abi::{Abi, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use log::{debug, info};
use once_cell::sync::Lazy;
use std::sync::Arc;

fn eip1967_slot(label: &str) -> H256 {
    let hashed = U256::from_big_endian(&keccak256(label.as_bytes())) - U256::one();
    let mut word = [0u8; 32];
    hashed.to_big_endian(&mut word);
    H256::from(word)
}

/// `0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc`
pub static EIP1967_IMPLEMENTATION_SLOT: Lazy<H256> =
    Lazy::new(|| eip1967_slot("eip1967.proxy.implementation"));

/// `0xa3f0ad74e5423aebfd80d3ef4346578335a9a72aeaee59ff6cb3582b35133d50`
pub static EIP1967_BEACON_SLOT: Lazy<H256> = Lazy::new(|| eip1967_slot("eip1967.proxy.beacon"));

/// `0x7050c9e0f4ca769c69bd3a8ef740bc37934f8e2c036e5a723fd8ee048ed3f8c3`
pub static ZEPPELINOS_IMPLEMENTATION_SLOT: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256("org.zeppelinos.proxy.implementation".as_bytes())));

/// Minimal beacon interface: `implementation() returns (address)`.
static BEACON_ABI: Lazy<Abi> = Lazy::new(|| {
    ethers::abi::parse_abi(&["function implementation() external view returns (address)"])
        .unwrap_or_default()
});

/// Outcome of resolving one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplementationRecord {
    /// Logic contract currently installed behind the proxy.
    Implementation(Address),
    /// No known convention matched; the address is its own implementation.
    NotAProxy,
}

impl ImplementationRecord {
    /// Address whose interface describes `proxy`.
    pub fn abi_target(&self, proxy: Address) -> Address {
        match self {
            ImplementationRecord::Implementation(implementation) => *implementation,
            ImplementationRecord::NotAProxy => proxy,
        }
    }

    pub fn implementation(&self) -> Option<Address> {
        match self {
            ImplementationRecord::Implementation(implementation) => Some(*implementation),
            ImplementationRecord::NotAProxy => None,
        }
    }
}

/// Interprets a storage word as an address: low-order 20 bytes, zero means unset.
pub fn word_to_address(word: H256) -> Option<Address> {
    let address = Address::from_slice(&word.as_bytes()[12..]);
    if address.is_zero() {
        None
    } else {
        Some(address)
    }
}

/// One way of locating a proxy's implementation.
#[async_trait]
pub trait ImplementationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means "not found under this convention".
    async fn attempt(&self, reader: &dyn ChainReader, proxy: Address) -> Result<Option<Address>>;
}

/// Implementation address stored directly in a fixed slot.
#[derive(Debug, Clone)]
pub struct StorageSlotConvention {
    name: &'static str,
    slot: H256,
}

impl StorageSlotConvention {
    pub fn new(name: &'static str, slot: H256) -> Self {
        Self { name, slot }
    }

    pub fn eip1967() -> Self {
        Self::new("eip1967", *EIP1967_IMPLEMENTATION_SLOT)
    }

    pub fn zeppelinos() -> Self {
        Self::new("zeppelinos", *ZEPPELINOS_IMPLEMENTATION_SLOT)
    }

    pub fn slot(&self) -> H256 {
        self.slot
    }
}

#[async_trait]
impl ImplementationStrategy for StorageSlotConvention {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn attempt(&self, reader: &dyn ChainReader, proxy: Address) -> Result<Option<Address>> {
        let word = reader.read_storage(proxy, self.slot).await?;
        Ok(word_to_address(word))
    }
}

/// EIP-1967 beacon proxy: the slot holds a beacon, the beacon knows the implementation.
#[derive(Debug, Clone, Default)]
pub struct BeaconConvention;

#[async_trait]
impl ImplementationStrategy for BeaconConvention {
    fn name(&self) -> &'static str {
        "eip1967-beacon"
    }

    async fn attempt(&self, reader: &dyn ChainReader, proxy: Address) -> Result<Option<Address>> {
        let beacon = match word_to_address(reader.read_storage(proxy, *EIP1967_BEACON_SLOT).await?) {
            Some(beacon) => beacon,
            None => return Ok(None),
        };

        let output = reader
            .call(beacon, &BEACON_ABI, "implementation", Vec::new())
            .await?;
        match output.into_iter().next() {
            Some(Token::Address(implementation)) if !implementation.is_zero() => {
                Ok(Some(implementation))
            }
            Some(Token::Address(_)) => Ok(None),
            _ => Err(LensError::Decode(format!(
                "beacon {} returned a non-address implementation",
                checksummed(&beacon)
            ))),
        }
    }
}

/// Walks the configured conventions in order; the first hit wins.
pub struct ProxySlotResolver {
    reader: Arc<dyn ChainReader>,
    strategies: Vec<Box<dyn ImplementationStrategy>>,
}

impl ProxySlotResolver {
    /// EIP-1967 logic slot, then the legacy OpenZeppelin slot.
    pub fn new(reader: Arc<dyn ChainReader>) -> Self {
        Self::with_strategies(
            reader,
            vec![
                Box::new(StorageSlotConvention::eip1967()),
                Box::new(StorageSlotConvention::zeppelinos()),
            ],
        )
    }

    /// Default conventions plus the EIP-1967 beacon lookup.
    pub fn with_beacon(reader: Arc<dyn ChainReader>) -> Self {
        let mut resolver = Self::new(reader);
        resolver.strategies.push(Box::new(BeaconConvention));
        resolver
    }

    pub fn with_strategies(
        reader: Arc<dyn ChainReader>,
        strategies: Vec<Box<dyn ImplementationStrategy>>,
    ) -> Self {
        Self { reader, strategies }
    }

    pub fn conventions(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn resolve(&self, proxy: Address) -> Result<ImplementationRecord> {
        for strategy in &self.strategies {
            if let Some(implementation) = strategy.attempt(self.reader.as_ref(), proxy).await? {
                info!(
                    "Resolved proxy {} -> {} via {}",
                    checksummed(&proxy),
                    checksummed(&implementation),
                    strategy.name()
                );
                metrics::increment_proxy_resolution(strategy.name());
                return Ok(ImplementationRecord::Implementation(implementation));
            }
            debug!("{}: no {} implementation", checksummed(&proxy), strategy.name());
        }

        debug!("{} is not a known proxy", checksummed(&proxy));
        metrics::increment_proxy_resolution("none");
        Ok(ImplementationRecord::NotAProxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn derived_slots_match_published_constants() {
        assert_eq!(
            *EIP1967_IMPLEMENTATION_SLOT,
            H256::from_str("0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc")
                .unwrap()
        );
        assert_eq!(
            *EIP1967_BEACON_SLOT,
            H256::from_str("0xa3f0ad74e5423aebfd80d3ef4346578335a9a72aeaee59ff6cb3582b35133d50")
                .unwrap()
        );
        assert_eq!(
            *ZEPPELINOS_IMPLEMENTATION_SLOT,
            H256::from_str("0x7050c9e0f4ca769c69bd3a8ef740bc37934f8e2c036e5a723fd8ee048ed3f8c3")
                .unwrap()
        );
    }

    #[test]
    fn word_to_address_strips_padding() {
        let word = H256::from_str(
            "0x0000000000000000000000005faab9e1adbddad0a08734be8a52185fd6558e14",
        )
        .unwrap();
        assert_eq!(
            word_to_address(word),
            Some(Address::from_str("0x5faab9e1adbddad0a08734be8a52185fd6558e14").unwrap())
        );
        assert_eq!(word_to_address(H256::zero()), None);
    }

    #[test]
    fn not_a_proxy_targets_itself() {
        let proxy = Address::repeat_byte(0x11);
        let implementation = Address::repeat_byte(0x22);
        assert_eq!(ImplementationRecord::NotAProxy.abi_target(proxy), proxy);
        assert_eq!(
            ImplementationRecord::Implementation(implementation).abi_target(proxy),
            implementation
        );
    }
}
