use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::cache::ResolutionCache;
use super::{normalize_domain, verify_reverse, AddressResolver, NameResolver, ResolutionProvider};
use crate::error::ResolutionError;
use crate::models::chain::Chain;
use crate::models::domain_record::ResolvedValue;
use crate::net::HttpClient;
use crate::utils::address::{lowercase_hex, parse_non_null_address};

/// Top-level domains served by Unstoppable Domains
pub const UNSTOPPABLE_TLDS: &[&str] = &[
    "crypto",
    "nft",
    "wallet",
    "x",
    "blockchain",
    "bitcoin",
    "dao",
    "888",
    "zil",
    "polygon",
    "unstoppable",
    "klever",
    "hi",
    "kresus",
    "anime",
    "manga",
    "binanceus",
    "go",
    "pudgy",
];

fn validate(name: &str) -> Result<String, ResolutionError> {
    let name = normalize_domain(name)?;
    let tld = name.rsplit('.').next().unwrap_or_default();
    if UNSTOPPABLE_TLDS.contains(&tld) {
        Ok(name)
    } else {
        Err(ResolutionError::InvalidInput(name))
    }
}

/// First non-null address among `candidates`, in order.
fn first_address(candidates: &[&Value]) -> Option<Address> {
    candidates
        .iter()
        .filter_map(|value| value.as_str())
        .find_map(parse_non_null_address)
}

/// Unstoppable Domains resolution API (v2, bearer-authenticated), forward and reverse.
pub struct UnstoppableV2 {
    http: Arc<dyn HttpClient>,
    api: String,
    api_key: Option<String>,
    forward_cache: ResolutionCache,
    reverse_cache: ResolutionCache,
}

impl UnstoppableV2 {
    pub fn new(
        http: Arc<dyn HttpClient>,
        api: &str,
        api_key: Option<String>,
        forward_cache: ResolutionCache,
        reverse_cache: ResolutionCache,
    ) -> Self {
        Self {
            http,
            api: api.trim_end_matches('/').to_string(),
            api_key,
            forward_cache,
            reverse_cache,
        }
    }
}

impl ResolutionProvider for UnstoppableV2 {
    fn provider(&self) -> &'static str {
        "unstoppable-v2"
    }
}

#[async_trait]
impl AddressResolver for UnstoppableV2 {
    fn cached_address(&self, name: &str) -> Option<Address> {
        self.forward_cache.get(name, Chain::MAINNET)?.as_address()
    }

    async fn resolve_address(&self, name: &str) -> Result<Address, ResolutionError> {
        let name = validate(name)?;
        let url = format!("{}/domains/{name}", self.api);
        let response = self.http.get_json(&url, self.api_key.as_deref()).await?;

        let address = first_address(&[
            &response["records"]["crypto.ETH.address"],
            &response["meta"]["owner"],
        ])
        .ok_or_else(|| ResolutionError::AddressNotFound(name.clone()))?;

        log::debug!("resolution::unstoppable: {name} -> {address}");
        self.forward_cache
            .put(&name, Chain::MAINNET, ResolvedValue::Address(address));
        Ok(address)
    }
}

#[async_trait]
impl NameResolver for UnstoppableV2 {
    fn cached_name(&self, address: Address) -> Option<String> {
        self.reverse_cache
            .get(&address.to_string(), Chain::MAINNET)?
            .as_name()
            .map(str::to_string)
    }

    async fn resolve_name(&self, address: Address) -> Result<String, ResolutionError> {
        let url = format!("{}/reverse/{}", self.api, lowercase_hex(&address));
        let response = self.http.get_json(&url, self.api_key.as_deref()).await?;

        let name = response["meta"]["domain"]
            .as_str()
            .map(|domain| domain.trim().to_lowercase())
            .filter(|domain| !domain.is_empty())
            .ok_or(ResolutionError::NameNotFound(address))?;

        let name = verify_reverse(self, address, name).await?;
        self.reverse_cache.put(
            &address.to_string(),
            Chain::MAINNET,
            ResolvedValue::Name(name.clone()),
        );
        Ok(name)
    }
}

/// Legacy Unstoppable Domains REST API (v1). Forward resolution only.
pub struct UnstoppableV1 {
    http: Arc<dyn HttpClient>,
    api: String,
    cache: ResolutionCache,
}

impl UnstoppableV1 {
    pub fn new(http: Arc<dyn HttpClient>, api: &str, cache: ResolutionCache) -> Self {
        Self {
            http,
            api: api.trim_end_matches('/').to_string(),
            cache,
        }
    }
}

impl ResolutionProvider for UnstoppableV1 {
    fn provider(&self) -> &'static str {
        "unstoppable-v1"
    }
}

#[async_trait]
impl AddressResolver for UnstoppableV1 {
    fn cached_address(&self, name: &str) -> Option<Address> {
        self.cache.get(name, Chain::MAINNET)?.as_address()
    }

    async fn resolve_address(&self, name: &str) -> Result<Address, ResolutionError> {
        let name = validate(name)?;
        let url = format!("{}/api/v1/{name}", self.api);
        let response = self.http.get_json(&url, None).await?;

        let address = first_address(&[&response["addresses"]["ETH"], &response["meta"]["owner"]])
            .ok_or_else(|| ResolutionError::AddressNotFound(name.clone()))?;

        self.cache
            .put(&name, Chain::MAINNET, ResolvedValue::Address(address));
        Ok(address)
    }
}
