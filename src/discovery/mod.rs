//! Contract discovery through Etherscan-compatible transaction history APIs.
//!
//! The discoverer turns a wallet's history into a set of candidate contracts for
//! token autodetection. Pagination follows block numbers (`startblock` advances to
//! the highest block seen) since explorer page windows are capped; only a block that
//! fills whole pages on its own is walked with `page`. Malformed entries are skipped
//! and counted, never fatal.

use alloy::primitives::{Address, U256};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use url::Url;

use crate::error::DiscoveryError;
use crate::models::chain::Chain;
use crate::net::HttpClient;
use crate::utils::address::{lowercase_hex, parse_address, parse_non_null_address};

/// Stops a single `discover` call from walking an unbounded history
const MAX_PAGES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiscoveryKind {
    /// Normal transactions, the contract is the `to` address
    Transactions,
    Erc20Transfers,
    NftTransfers,
    Erc1155Transfers,
}

impl DiscoveryKind {
    pub const ALL: [Self; 4] = [
        Self::Transactions,
        Self::Erc20Transfers,
        Self::NftTransfers,
        Self::Erc1155Transfers,
    ];

    pub const fn action(self) -> &'static str {
        match self {
            Self::Transactions => "txlist",
            Self::Erc20Transfers => "tokentx",
            Self::NftTransfers => "tokennfttx",
            Self::Erc1155Transfers => "token1155tx",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExplorerEndpoint {
    pub api: Url,
    pub api_key: Option<String>,
}

/// One discovery result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub contracts: HashSet<Address>,
    pub max_block: Option<u64>,
    /// The page limit cut the walk short; rows of `max_block` may be missing
    pub truncated: bool,
    /// ERC1155 token ids seen per contract (`token1155tx` only)
    pub erc1155_token_ids: HashMap<Address, HashSet<U256>>,
    pub skipped: usize,
}

impl Discovery {
    /// Last block whose history is complete, to resume after next time.
    pub fn watermark(&self) -> Option<u64> {
        if self.truncated {
            self.max_block.and_then(|block| block.checked_sub(1))
        } else {
            self.max_block
        }
    }

    fn merge(&mut self, other: Self) {
        self.contracts.extend(other.contracts);
        self.max_block = self.max_block.max(other.max_block);
        for (contract, ids) in other.erc1155_token_ids {
            self.erc1155_token_ids.entry(contract).or_default().extend(ids);
        }
        self.skipped += other.skipped;
    }
}

pub struct ContractInteractionDiscoverer {
    http: Arc<dyn HttpClient>,
    endpoints: HashMap<Chain, ExplorerEndpoint>,
    page_size: u32,
}

impl ContractInteractionDiscoverer {
    pub fn new(
        http: Arc<dyn HttpClient>,
        endpoints: HashMap<Chain, ExplorerEndpoint>,
        page_size: u32,
    ) -> Self {
        Self {
            http,
            endpoints,
            page_size: page_size.max(1),
        }
    }

    pub fn supports(&self, chain: Chain) -> bool {
        self.endpoints.contains_key(&chain)
    }

    /// Discovers contracts `wallet` interacted with on `chain` from `since_block` on.
    ///
    /// # Errors
    /// * [`DiscoveryError::UnsupportedChain`] if no explorer is configured for `chain`
    /// * [`DiscoveryError::Http`] / [`DiscoveryError::Api`] when a page cannot be fetched
    pub async fn discover(
        &self,
        wallet: Address,
        chain: Chain,
        kind: DiscoveryKind,
        since_block: u64,
    ) -> Result<Discovery, DiscoveryError> {
        let endpoint = self
            .endpoints
            .get(&chain)
            .ok_or(DiscoveryError::UnsupportedChain(chain))?;

        let mut discovery = Discovery::default();
        let mut cursor = since_block;
        let mut page = 1;
        let mut complete = false;
        for _ in 0..MAX_PAGES {
            let url = self.page_url(endpoint, wallet, kind, cursor, page);
            let response = self.http.get_json(url.as_str(), None).await?;
            let (fetched, entries) = parse_page(&response, kind)?;
            let next_cursor = fetched.max_block;
            discovery.merge(fetched);

            if entries < self.page_size as usize {
                complete = true;
                break;
            }
            // A full page resumes at its highest block; rows of that block repeat and
            // the sets absorb them. A page that never left the cursor block moves on
            // to the next page of the same block.
            match next_cursor {
                Some(next) if next > cursor => {
                    cursor = next;
                    page = 1;
                }
                Some(_) => page += 1,
                None => break,
            }
        }
        discovery.truncated = !complete;

        if discovery.truncated {
            log::debug!(
                "discovery: {} for {wallet} on chain {chain} stopped after {MAX_PAGES} pages at block {:?}",
                kind.action(),
                discovery.max_block
            );
        }
        if discovery.skipped > 0 {
            log::warn!(
                "discovery: skipped {} malformed {} entries for {wallet} on chain {chain}",
                discovery.skipped,
                kind.action()
            );
        }
        log::debug!(
            "discovery: {} {} contracts for {wallet} on chain {chain} since block {since_block}",
            discovery.contracts.len(),
            kind.action()
        );
        Ok(discovery)
    }

    fn page_url(
        &self,
        endpoint: &ExplorerEndpoint,
        wallet: Address,
        kind: DiscoveryKind,
        start_block: u64,
        page: u32,
    ) -> Url {
        let mut url = endpoint.api.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("module", "account")
                .append_pair("action", kind.action())
                .append_pair("address", &lowercase_hex(&wallet))
                .append_pair("startblock", &start_block.to_string())
                .append_pair("sort", "asc")
                .append_pair("page", &page.to_string())
                .append_pair("offset", &self.page_size.to_string());
            if let Some(key) = &endpoint.api_key {
                query.append_pair("apikey", key);
            }
        }
        url
    }
}

/// Parses one explorer response. Returns the page and its raw entry count.
fn parse_page(response: &Value, kind: DiscoveryKind) -> Result<(Discovery, usize), DiscoveryError> {
    let Some(entries) = response["result"].as_array() else {
        let message = response["message"].as_str().unwrap_or_default();
        let result = response["result"].as_str().unwrap_or_default();
        return Err(DiscoveryError::Api(format!("{message}: {result}")));
    };
    if response["status"].as_str() == Some("0") && !entries.is_empty() {
        let message = response["message"].as_str().unwrap_or_default();
        return Err(DiscoveryError::Api(message.to_string()));
    }

    let mut page = Discovery::default();
    for entry in entries {
        let block = entry["blockNumber"]
            .as_str()
            .and_then(|block| block.parse::<u64>().ok());
        page.max_block = page.max_block.max(block);

        let Some(contract) = contract_of(entry, kind) else {
            page.skipped += 1;
            continue;
        };
        page.contracts.insert(contract);

        if kind == DiscoveryKind::Erc1155Transfers {
            if let Some(id) = entry["tokenID"]
                .as_str()
                .and_then(|id| U256::from_str_radix(id, 10).ok())
            {
                page.erc1155_token_ids.entry(contract).or_default().insert(id);
            }
        }
    }
    Ok((page, entries.len()))
}

fn contract_of(entry: &Value, kind: DiscoveryKind) -> Option<Address> {
    let to = parse_address(entry["to"].as_str()?)?;
    match kind {
        DiscoveryKind::Transactions => (!to.is_zero()).then_some(to),
        _ => parse_non_null_address(entry["contractAddress"].as_str()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{addr, MockHttpClient};
    use serde_json::json;

    fn discoverer(http: Arc<MockHttpClient>, page_size: u32) -> ContractInteractionDiscoverer {
        let endpoints = HashMap::from([(
            Chain::MAINNET,
            ExplorerEndpoint {
                api: Url::parse("https://explorer.test/api").unwrap(),
                api_key: Some("KEY".to_string()),
            },
        )]);
        ContractInteractionDiscoverer::new(http, endpoints, page_size)
    }

    #[tokio::test]
    async fn test_skips_entry_with_empty_to() {
        let http = Arc::new(MockHttpClient::new());
        http.route(
            "action=txlist",
            json!({
                "status": "1",
                "message": "OK",
                "result": [
                    { "blockNumber": "100", "to": "", "contractAddress": addr(0x01).to_string() },
                    { "blockNumber": "105", "to": addr(0x02).to_string(), "contractAddress": "" }
                ]
            }),
        );
        let discovery = discoverer(http.clone(), 1000)
            .discover(addr(0xee), Chain::MAINNET, DiscoveryKind::Transactions, 0)
            .await
            .unwrap();

        assert_eq!(discovery.contracts, HashSet::from([addr(0x02)]));
        assert_eq!(discovery.max_block, Some(105));
        assert_eq!(discovery.skipped, 1);

        let request = &http.requests()[0];
        assert!(request.contains("module=account"));
        assert!(request.contains("startblock=0"));
        assert!(request.contains("apikey=KEY"));
    }

    #[tokio::test]
    async fn test_token_transfers_use_contract_address() {
        let http = Arc::new(MockHttpClient::new());
        http.route(
            "action=tokentx",
            json!({
                "status": "1",
                "message": "OK",
                "result": [
                    { "blockNumber": "7", "to": addr(0xee).to_string(), "contractAddress": addr(0x03).to_string() },
                    { "blockNumber": "8", "to": addr(0xee).to_string(), "contractAddress": addr(0x03).to_string() },
                    { "blockNumber": "9", "to": addr(0xee).to_string(), "contractAddress": "0x1234" }
                ]
            }),
        );
        let discovery = discoverer(http, 1000)
            .discover(addr(0xee), Chain::MAINNET, DiscoveryKind::Erc20Transfers, 5)
            .await
            .unwrap();

        assert_eq!(discovery.contracts, HashSet::from([addr(0x03)]));
        assert_eq!(discovery.max_block, Some(9));
        assert_eq!(discovery.skipped, 1);
    }

    #[tokio::test]
    async fn test_erc1155_collects_token_ids() {
        let http = Arc::new(MockHttpClient::new());
        http.route(
            "action=token1155tx",
            json!({
                "status": "1",
                "message": "OK",
                "result": [
                    { "blockNumber": "1", "to": addr(0xee).to_string(), "contractAddress": addr(0x04).to_string(), "tokenID": "1" },
                    { "blockNumber": "2", "to": addr(0xee).to_string(), "contractAddress": addr(0x04).to_string(), "tokenID": "2" }
                ]
            }),
        );
        let discovery = discoverer(http, 1000)
            .discover(addr(0xee), Chain::MAINNET, DiscoveryKind::Erc1155Transfers, 0)
            .await
            .unwrap();

        assert_eq!(
            discovery.erc1155_token_ids[&addr(0x04)],
            HashSet::from([U256::from(1), U256::from(2)])
        );
    }

    #[tokio::test]
    async fn test_no_transactions_is_empty() {
        let http = Arc::new(MockHttpClient::new());
        http.route(
            "action=txlist",
            json!({ "status": "0", "message": "No transactions found", "result": [] }),
        );
        let discovery = discoverer(http, 1000)
            .discover(addr(0xee), Chain::MAINNET, DiscoveryKind::Transactions, 0)
            .await
            .unwrap();

        assert!(discovery.contracts.is_empty());
        assert_eq!(discovery.max_block, None);
    }

    #[tokio::test]
    async fn test_api_error() {
        let http = Arc::new(MockHttpClient::new());
        http.route(
            "action=txlist",
            json!({ "status": "0", "message": "NOTOK", "result": "Invalid API Key" }),
        );
        let result = discoverer(http, 1000)
            .discover(addr(0xee), Chain::MAINNET, DiscoveryKind::Transactions, 0)
            .await;

        assert_eq!(
            result,
            Err(DiscoveryError::Api("NOTOK: Invalid API Key".to_string()))
        );
    }

    #[tokio::test]
    async fn test_full_page_advances_start_block() {
        let http = Arc::new(MockHttpClient::new());
        http.route(
            "startblock=0&",
            json!({
                "status": "1",
                "message": "OK",
                "result": [
                    { "blockNumber": "10", "to": addr(0x01).to_string() },
                    { "blockNumber": "20", "to": addr(0x02).to_string() }
                ]
            }),
        );
        http.route(
            "startblock=20&",
            json!({
                "status": "1",
                "message": "OK",
                "result": [
                    { "blockNumber": "30", "to": addr(0x03).to_string() }
                ]
            }),
        );
        let discovery = discoverer(http.clone(), 2)
            .discover(addr(0xee), Chain::MAINNET, DiscoveryKind::Transactions, 0)
            .await
            .unwrap();

        assert_eq!(discovery.contracts.len(), 3);
        assert_eq!(discovery.max_block, Some(30));
        assert!(!discovery.truncated);
        assert_eq!(http.call_count(), 2);
    }

    #[tokio::test]
    async fn test_crowded_block_walks_pages() {
        let http = Arc::new(MockHttpClient::new());
        let row = |block: &str, to: u8| json!({ "blockNumber": block, "to": addr(to).to_string() });
        http.route(
            "startblock=0&",
            json!({ "status": "1", "message": "OK", "result": [row("5", 0x01), row("5", 0x02)] }),
        );
        http.route(
            "startblock=5&sort=asc&page=1&",
            json!({ "status": "1", "message": "OK", "result": [row("5", 0x01), row("5", 0x02)] }),
        );
        http.route(
            "startblock=5&sort=asc&page=2&",
            json!({ "status": "1", "message": "OK", "result": [row("5", 0x03)] }),
        );
        let discovery = discoverer(http.clone(), 2)
            .discover(addr(0xee), Chain::MAINNET, DiscoveryKind::Transactions, 0)
            .await
            .unwrap();

        assert_eq!(
            discovery.contracts,
            HashSet::from([addr(0x01), addr(0x02), addr(0x03)])
        );
        assert!(!discovery.truncated);
        assert_eq!(discovery.watermark(), Some(5));
        assert_eq!(http.call_count(), 3);
    }

    #[tokio::test]
    async fn test_page_limit_holds_back_watermark() {
        let http = Arc::new(MockHttpClient::new());
        for start in 0..MAX_PAGES as u64 {
            let block = (start + 1).to_string();
            http.route(
                &format!("startblock={start}&"),
                json!({
                    "status": "1",
                    "message": "OK",
                    "result": [
                        { "blockNumber": block, "to": addr(0x01).to_string() },
                        { "blockNumber": block, "to": addr(0x02).to_string() }
                    ]
                }),
            );
        }
        http.route(
            "startblock=10&",
            json!({
                "status": "1",
                "message": "OK",
                "result": [{ "blockNumber": "10", "to": addr(0x03).to_string() }]
            }),
        );
        let discoverer = discoverer(http.clone(), 2);

        let first = discoverer
            .discover(addr(0xee), Chain::MAINNET, DiscoveryKind::Transactions, 0)
            .await
            .unwrap();
        assert!(first.truncated);
        assert_eq!(first.max_block, Some(10));
        assert_eq!(first.watermark(), Some(9));
        assert!(!first.contracts.contains(&addr(0x03)));
        assert_eq!(http.call_count(), MAX_PAGES);

        let since = first.watermark().map_or(0, |block| block + 1);
        let second = discoverer
            .discover(addr(0xee), Chain::MAINNET, DiscoveryKind::Transactions, since)
            .await
            .unwrap();
        assert!(second.contracts.contains(&addr(0x03)));
        assert!(!second.truncated);
        assert_eq!(second.watermark(), Some(10));
    }

    #[tokio::test]
    async fn test_unsupported_chain() {
        let http = Arc::new(MockHttpClient::new());
        let result = discoverer(http, 1000)
            .discover(addr(0xee), Chain::CELO, DiscoveryKind::Transactions, 0)
            .await;
        assert_eq!(result, Err(DiscoveryError::UnsupportedChain(Chain::CELO)));
    }
}
