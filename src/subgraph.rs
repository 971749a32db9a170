// src/subgraph.rs

//! Borrower discovery through the Aave V3 subgraph.
//!
//! Finds accounts that borrowed a given asset recently and have not repaid
//! it since, which are the candidates worth checking with
//! [`crate::lending_pool::LendingPoolReader::account_health`].

use crate::settings::Settings;
use crate::types::conversions::string_to_address;
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, U256};
use indexmap::IndexMap;
use log::{debug, info};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct EventUser {
    pub id: String,
}

/// A `borrows` or `repays` entity as returned by the subgraph.
#[derive(Debug, Clone, Deserialize)]
pub struct LoanEvent {
    pub user: EventUser,
    /// Raw token amount (string-encoded big integer).
    pub amount: String,
    pub timestamp: u64,
}

impl LoanEvent {
    pub fn account(&self) -> Result<Address> {
        string_to_address(&self.user.id).with_context(|| format!("bad user id {}", self.user.id))
    }

    pub fn amount(&self) -> Result<U256> {
        U256::from_dec_str(&self.amount).map_err(|e| anyhow!("bad amount {}: {e}", self.amount))
    }
}

#[derive(Debug, Deserialize)]
struct GraphResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BorrowsData {
    borrows: Vec<LoanEvent>,
}

#[derive(Debug, Deserialize)]
struct RepaysData {
    repays: Vec<LoanEvent>,
}

/// Oldest timestamp of a newest-first event list.
pub fn earliest_timestamp(events: &[LoanEvent]) -> Option<u64> {
    events.last().map(|e| e.timestamp)
}

/// Accounts whose borrowed total exceeds their repaid total.
///
/// Output keeps the order in which accounts first appear in `borrows`. Repays
/// from accounts that never borrowed in the window are ignored.
pub fn outstanding_borrowers(borrows: &[LoanEvent], repays: &[LoanEvent]) -> Result<Vec<Address>> {
    let mut owed: IndexMap<Address, (U256, U256)> = IndexMap::new();
    for event in borrows {
        let entry = owed.entry(event.account()?).or_default();
        entry.0 = entry.0.saturating_add(event.amount()?);
    }
    for event in repays {
        if let Some(entry) = owed.get_mut(&event.account()?) {
            entry.1 = entry.1.saturating_add(event.amount()?);
        }
    }

    Ok(owed
        .into_iter()
        .filter(|(_, (borrowed, repaid))| borrowed > repaid)
        .map(|(account, _)| account)
        .collect())
}

pub struct SubgraphClient {
    client: reqwest::Client,
    url: String,
}

impl SubgraphClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Client for `aave.subgraph_url`, sharing the explorer request timeout.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(settings.aave.subgraph_url.clone(), settings.explorer.timeout())
    }

    async fn query<T: serde::de::DeserializeOwned>(&self, query: String) -> Result<T> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "query": query }))
            .send()
            .await
            .context("subgraph request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("subgraph HTTP error: {}", response.status()));
        }

        let body: GraphResponse<T> = response.json().await.context("subgraph JSON parse failed")?;
        if !body.errors.is_empty() {
            return Err(anyhow!("subgraph returned errors: {:?}", body.errors));
        }
        body.data.ok_or_else(|| anyhow!("subgraph response has no data"))
    }

    /// Most recent borrows of `symbol`, newest first.
    pub async fn borrows(&self, symbol: &str, first: u32, skip: u32) -> Result<Vec<LoanEvent>> {
        let query = format!(
            r#"{{
  borrows(
    where: {{ reserve_: {{ symbol: {symbol} }} }}
    orderBy: timestamp
    orderDirection: desc
    first: {first}
    skip: {skip}
  ) {{
    user {{ id }}
    amount
    timestamp
  }}
}}"#,
            symbol = serde_json::to_string(symbol)?,
        );
        let data: BorrowsData = self.query(query).await?;
        debug!("subgraph: {} {} borrows", data.borrows.len(), symbol);
        Ok(data.borrows)
    }

    /// Repays of `symbol` by `users` strictly after `since`, newest first.
    pub async fn repays(&self, symbol: &str, users: &[Address], since: u64) -> Result<Vec<LoanEvent>> {
        let ids: Vec<String> = users.iter().map(|u| format!("{u:#x}")).collect();
        let query = format!(
            r#"{{
  repays(
    where: {{ reserve_: {{ symbol: {symbol} }}, user_in: {users}, timestamp_gt: {since} }}
    orderBy: timestamp
    orderDirection: desc
  ) {{
    user {{ id }}
    amount
    timestamp
  }}
}}"#,
            symbol = serde_json::to_string(symbol)?,
            users = serde_json::to_string(&ids)?,
        );
        let data: RepaysData = self.query(query).await?;
        debug!("subgraph: {} {} repays", data.repays.len(), symbol);
        Ok(data.repays)
    }

    /// Recent `symbol` borrowers that still carry debt.
    pub async fn find_targets(&self, symbol: &str, first: u32, skip: u32) -> Result<Vec<Address>> {
        let borrows = self.borrows(symbol, first, skip).await?;
        let since = match earliest_timestamp(&borrows) {
            Some(ts) => ts,
            None => return Ok(Vec::new()),
        };

        let mut borrowers: Vec<Address> = Vec::with_capacity(borrows.len());
        for event in &borrows {
            let account = event.account()?;
            if !borrowers.contains(&account) {
                borrowers.push(account);
            }
        }

        let repays = self.repays(symbol, &borrowers, since).await?;
        let targets = outstanding_borrowers(&borrows, &repays)?;
        info!(
            "subgraph: {} of {} recent {} borrowers still in debt",
            targets.len(),
            borrowers.len(),
            symbol
        );
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(user: &str, amount: u64, timestamp: u64) -> LoanEvent {
        LoanEvent {
            user: EventUser { id: user.to_string() },
            amount: amount.to_string(),
            timestamp,
        }
    }

    const ALICE: &str = "0x3b3c3f31dae1fd6d056f67fb2d0ea2fd3217ad67";
    const BOB: &str = "0x00000000000000000000000000000000000000b0";
    const CAROL: &str = "0x00000000000000000000000000000000000000c0";

    #[test]
    fn earliest_is_last_of_descending_list() {
        let events = vec![event(ALICE, 1, 300), event(BOB, 1, 200), event(CAROL, 1, 100)];
        assert_eq!(earliest_timestamp(&events), Some(100));
        assert_eq!(earliest_timestamp(&[]), None);
    }

    #[test]
    fn fully_repaid_borrowers_are_dropped() {
        let borrows = vec![
            event(ALICE, 100, 300),
            event(BOB, 50, 200),
            event(ALICE, 20, 150),
            event(CAROL, 10, 100),
        ];
        let repays = vec![event(BOB, 50, 350), event(ALICE, 60, 320), event(CAROL, 5, 310)];

        let targets = outstanding_borrowers(&borrows, &repays).unwrap();
        assert_eq!(
            targets,
            vec![string_to_address(ALICE).unwrap(), string_to_address(CAROL).unwrap()]
        );
    }

    #[test]
    fn repays_match_regardless_of_case() {
        let borrows = vec![event(ALICE, 100, 300)];
        let repays = vec![event(&ALICE.to_uppercase().replace("0X", "0x"), 100, 400)];
        assert!(outstanding_borrowers(&borrows, &repays).unwrap().is_empty());
    }

    #[test]
    fn repays_without_borrow_are_ignored() {
        let borrows = vec![event(ALICE, 100, 300)];
        let repays = vec![event(BOB, 1_000, 400)];
        assert_eq!(
            outstanding_borrowers(&borrows, &repays).unwrap(),
            vec![string_to_address(ALICE).unwrap()]
        );
    }
}
