// src/contract_directory.rs

//! # Contract Directory
//!
//! Produces callable [`ContractHandle`]s for arbitrary addresses.
//!
//! Calls always go to the address the caller asked for (the proxy holds the
//! state) while the interface comes from whatever implementation is installed
//! behind it right now:
//!
//! ```text
//! address ──► ProxySlotResolver ──► implementation? ──► AbiSource ──► Abi
//!    │                                                                 │
//!    └──────────────────────── ContractHandle { address, abi } ◄───────┘
//! ```

use crate::abi_fetcher::AbiSource;
use crate::chain_reader::{find_function, ChainReader};
use crate::errors::Result;
use crate::proxy_resolver::{ImplementationRecord, ProxySlotResolver};
use crate::types::conversions::checksummed;
use ethers::abi::{Abi, Token};
use ethers::types::Address;
use log::debug;
use std::sync::Arc;

/// A contract bound to its call target and a typed interface.
#[derive(Clone)]
pub struct ContractHandle {
    address: Address,
    implementation: Option<Address>,
    abi: Arc<Abi>,
    reader: Arc<dyn ChainReader>,
}

impl ContractHandle {
    pub fn new(
        address: Address,
        implementation: Option<Address>,
        abi: Arc<Abi>,
        reader: Arc<dyn ChainReader>,
    ) -> Self {
        Self {
            address,
            implementation,
            abi,
            reader,
        }
    }

    /// Call target. Always the address that was looked up, never the implementation.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Logic contract the interface was taken from; `None` if the address is not a proxy.
    pub fn implementation(&self) -> Option<Address> {
        self.implementation
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.abi.function(method).is_ok()
    }

    /// Invokes a read-only method and returns its decoded outputs.
    pub async fn call(&self, method: &str, args: Vec<Token>) -> Result<Vec<Token>> {
        find_function(&self.abi, self.address, method)?;
        self.reader.call(self.address, &self.abi, method, args).await
    }
}

impl std::fmt::Debug for ContractHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractHandle")
            .field("address", &checksummed(&self.address))
            .field("implementation", &self.implementation.as_ref().map(checksummed))
            .field("functions", &self.abi.functions.len())
            .finish()
    }
}

/// Resolves proxies and fetches interfaces to build [`ContractHandle`]s.
pub struct ContractDirectory {
    reader: Arc<dyn ChainReader>,
    resolver: ProxySlotResolver,
    abi_source: Arc<dyn AbiSource>,
}

impl ContractDirectory {
    pub fn new(reader: Arc<dyn ChainReader>, abi_source: Arc<dyn AbiSource>) -> Self {
        let resolver = ProxySlotResolver::new(Arc::clone(&reader));
        Self::with_resolver(reader, resolver, abi_source)
    }

    pub fn with_resolver(
        reader: Arc<dyn ChainReader>,
        resolver: ProxySlotResolver,
        abi_source: Arc<dyn AbiSource>,
    ) -> Self {
        Self {
            reader,
            resolver,
            abi_source,
        }
    }

    pub fn resolver(&self) -> &ProxySlotResolver {
        &self.resolver
    }

    pub async fn get_contract(&self, address: Address) -> Result<ContractHandle> {
        let record = self.resolver.resolve(address).await?;
        let abi_target = record.abi_target(address);
        if let ImplementationRecord::NotAProxy = record {
            debug!("{} used as its own ABI source", checksummed(&address));
        }

        let abi = self.abi_source.fetch(abi_target).await?;
        Ok(ContractHandle::new(
            address,
            record.implementation(),
            abi,
            Arc::clone(&self.reader),
        ))
    }
}
