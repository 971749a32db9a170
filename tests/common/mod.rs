//! In-memory chain reader and ABI source shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use ethers::abi::{Abi, Token};
use ethers::types::{Address, H256};
use proxy_lens_sdk::chain_reader::find_function;
use proxy_lens_sdk::types::conversions::checksummed;
use proxy_lens_sdk::{AbiSource, ChainReader, LensError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

/// Left-pads an address into a storage word, the way proxies store it.
pub fn address_word(address: Address) -> H256 {
    H256::from(address)
}

pub fn erc20_abi() -> Abi {
    ethers::abi::parse_abi(&[
        "function name() external view returns (string)",
        "function decimals() external view returns (uint8)",
    ])
    .expect("valid erc20 fixture")
}

pub fn pool_abi() -> Abi {
    ethers::abi::parse_abi(&[
        "function getReservesList() external view returns (address[])",
        "function getReserveData(address asset) external view returns (uint256, uint128, uint128, uint128, uint128, uint128, uint40, uint16)",
        "function getUserAccountData(address user) external view returns (uint256, uint256, uint256, uint256, uint256, uint256)",
    ])
    .expect("valid pool fixture")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub target: Address,
    pub method: String,
}

struct CannedCall {
    target: Address,
    method: String,
    args: Vec<Token>,
    output: Vec<Token>,
}

/// Programmable chain: storage words, canned view-call results, per-address latency.
#[derive(Default)]
pub struct MockChainReader {
    storage: HashMap<(Address, H256), H256>,
    calls: Vec<CannedCall>,
    delays: HashMap<Address, Duration>,
    broken: HashSet<Address>,
    pub call_log: Arc<Mutex<Vec<CallRecord>>>,
}

impl MockChainReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_storage(&mut self, address: Address, slot: H256, value: H256) -> &mut Self {
        self.storage.insert((address, slot), value);
        self
    }

    pub fn on_call(
        &mut self,
        target: Address,
        method: &str,
        args: Vec<Token>,
        output: Vec<Token>,
    ) -> &mut Self {
        self.calls.push(CannedCall {
            target,
            method: method.to_string(),
            args,
            output,
        });
        self
    }

    pub fn delay(&mut self, address: Address, delay: Duration) -> &mut Self {
        self.delays.insert(address, delay);
        self
    }

    /// Every read against `address` fails like a dead RPC would.
    pub fn break_address(&mut self, address: Address) -> &mut Self {
        self.broken.insert(address);
        self
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.call_log.lock().unwrap().clone()
    }

    async fn latency(&self, address: Address) -> Result<()> {
        if let Some(delay) = self.delays.get(&address) {
            tokio::time::sleep(*delay).await;
        }
        if self.broken.contains(&address) {
            return Err(LensError::Chain {
                address: checksummed(&address),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChainReader for MockChainReader {
    async fn read_storage(&self, address: Address, slot: H256) -> Result<H256> {
        self.latency(address).await?;
        Ok(self
            .storage
            .get(&(address, slot))
            .copied()
            .unwrap_or_else(H256::zero))
    }

    async fn call(
        &self,
        address: Address,
        abi: &Abi,
        method: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Token>> {
        let function = find_function(abi, address, method)?;
        function
            .encode_input(&args)
            .map_err(|e| LensError::Decode(e.to_string()))?;
        self.latency(address).await?;

        self.call_log.lock().unwrap().push(CallRecord {
            target: address,
            method: method.to_string(),
        });

        self.calls
            .iter()
            .find(|c| c.target == address && c.method == method && c.args == args)
            .map(|c| c.output.clone())
            .ok_or_else(|| LensError::Chain {
                address: checksummed(&address),
                reason: format!("execution reverted: {method}"),
            })
    }
}

/// Explorer stand-in keyed by the address the interface is requested for.
#[derive(Default)]
pub struct MockAbiSource {
    abis: HashMap<Address, Arc<Abi>>,
    failing: HashSet<Address>,
    delays: HashMap<Address, Duration>,
    /// Addresses in the order their fetch *completed*.
    pub fetch_log: Arc<Mutex<Vec<Address>>>,
}

impl MockAbiSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_abi(&mut self, address: Address, abi: Abi) -> &mut Self {
        self.abis.insert(address, Arc::new(abi));
        self
    }

    pub fn failing(&mut self, address: Address) -> &mut Self {
        self.failing.insert(address);
        self
    }

    pub fn delay(&mut self, address: Address, delay: Duration) -> &mut Self {
        self.delays.insert(address, delay);
        self
    }

    pub fn fetches(&self) -> Vec<Address> {
        self.fetch_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl AbiSource for MockAbiSource {
    async fn fetch(&self, address: Address) -> Result<Arc<Abi>> {
        if let Some(delay) = self.delays.get(&address) {
            tokio::time::sleep(*delay).await;
        }
        self.fetch_log.lock().unwrap().push(address);

        if self.failing.contains(&address) {
            return Err(LensError::Lookup {
                address: checksummed(&address),
                reason: "Contract source code not verified".to_string(),
            });
        }
        self.abis
            .get(&address)
            .cloned()
            .ok_or_else(|| LensError::Lookup {
                address: checksummed(&address),
                reason: "no ABI registered".to_string(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// e.g. `GET /api?module=contract&... HTTP/1.1`
    pub line: String,
    pub body: String,
}

/// Local HTTP/1.1 server answering with canned responses.
///
/// Responses are served in order; the last one repeats once the list runs out.
pub struct HttpStub {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl HttpStub {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub async fn spawn_http_stub(path: &str, responses: Vec<(&'static str, String)>) -> HttpStub {
    assert!(!responses.is_empty(), "stub needs at least one response");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}{}", listener.local_addr().unwrap(), path);
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();
    let responses = Arc::new(responses);
    let served = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let seen = seen.clone();
            let responses = responses.clone();
            let served = served.clone();
            tokio::spawn(async move {
                let mut raw = Vec::new();
                let mut buf = [0u8; 4096];
                let header_end = loop {
                    if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => raw.extend_from_slice(&buf[..n]),
                    }
                };

                let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
                let content_length = head
                    .lines()
                    .filter_map(|l| l.split_once(':'))
                    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while raw.len() < header_end + content_length {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => raw.extend_from_slice(&buf[..n]),
                    }
                }

                seen.lock().unwrap().push(RecordedRequest {
                    line: head.lines().next().unwrap_or_default().to_string(),
                    body: String::from_utf8_lossy(&raw[header_end..]).to_string(),
                });

                let n = served.fetch_add(1, Ordering::SeqCst).min(responses.len() - 1);
                let (status_line, body) = &responses[n];
                let response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    HttpStub { base_url, requests }
}
