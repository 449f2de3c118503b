use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::cache::ResolutionCache;
use super::{normalize_domain, AddressResolver, ResolutionProvider};
use crate::error::ResolutionError;
use crate::models::chain::Chain;
use crate::models::domain_record::ResolvedValue;
use crate::net::HttpClient;
use crate::utils::address::parse_non_null_address;

// Record keys that carry an Ethereum address (symbolic and SLIP-44 forms)
const ETH_RECORD_KEYS: &[&str] = &["address.eth", "address.60"];

/// DAS (.bit) resolution through the public indexer. Forward only.
pub struct DasResolver {
    http: Arc<dyn HttpClient>,
    api: String,
    cache: ResolutionCache,
}

impl DasResolver {
    pub fn new(http: Arc<dyn HttpClient>, api: &str, cache: ResolutionCache) -> Self {
        Self {
            http,
            api: api.trim_end_matches('/').to_string(),
            cache,
        }
    }
}

impl ResolutionProvider for DasResolver {
    fn provider(&self) -> &'static str {
        "das"
    }
}

#[async_trait]
impl AddressResolver for DasResolver {
    fn cached_address(&self, name: &str) -> Option<Address> {
        self.cache.get(name, Chain::MAINNET)?.as_address()
    }

    async fn resolve_address(&self, name: &str) -> Result<Address, ResolutionError> {
        let name = normalize_domain(name)?;
        if !name.ends_with(".bit") {
            return Err(ResolutionError::InvalidInput(name));
        }

        let url = format!("{}/v1/account/records", self.api);
        let response = self
            .http
            .post_json(&url, &json!({ "account": name }))
            .await?;

        let address = response["data"]["records"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|record| {
                record["key"]
                    .as_str()
                    .is_some_and(|key| ETH_RECORD_KEYS.contains(&key))
            })
            .filter_map(|record| record["value"].as_str())
            .find_map(parse_non_null_address)
            .ok_or_else(|| ResolutionError::AddressNotFound(name.clone()))?;

        log::debug!("resolution::das: {name} -> {address}");
        self.cache
            .put(&name, Chain::MAINNET, ResolvedValue::Address(address));
        Ok(address)
    }
}
