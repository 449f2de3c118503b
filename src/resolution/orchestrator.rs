use alloy::primitives::Address;
use std::sync::Arc;

use super::avatar::{AvatarGenerator, AvatarImage, Blockie, BlockieAvatars};
use super::{AddressResolver, NameResolver};
use crate::error::ResolutionError;
use crate::utils::address::parse_address;

/// Runs resolution across providers in a fixed order.
///
/// Every provider's cache is consulted before any network lookup. Network lookups then
/// fall back provider by provider; `InvalidInput` skips a provider, any other error moves
/// on to the next one. A reverse-resolution mismatch is never surfaced as a name and wins
/// over other errors when every provider fails.
pub struct DomainResolutionOrchestrator {
    forward: Vec<Arc<dyn AddressResolver>>,
    reverse: Vec<Arc<dyn NameResolver>>,
    avatars: Arc<dyn AvatarGenerator>,
}

impl DomainResolutionOrchestrator {
    pub fn new(
        forward: Vec<Arc<dyn AddressResolver>>,
        reverse: Vec<Arc<dyn NameResolver>>,
        avatars: Arc<dyn AvatarGenerator>,
    ) -> Self {
        Self {
            forward,
            reverse,
            avatars,
        }
    }

    /// Resolves a name (or address literal) to an address plus a best-effort avatar.
    ///
    /// # Errors
    /// * [`ResolutionError::ResolutionFailed`] wrapping the last provider error once all
    ///   providers are exhausted
    pub async fn resolve_address(
        &self,
        query: &str,
    ) -> Result<(Address, Option<AvatarImage>), ResolutionError> {
        if let Some(address) = parse_address(query) {
            return Ok((address, None));
        }

        for provider in &self.forward {
            if let Some(address) = provider.cached_address(query) {
                log::debug!(
                    "resolution::orchestrator: {query} served from {} cache",
                    provider.provider()
                );
                return Ok((address, Self::offline_avatar(address)));
            }
        }

        let mut last_error = None;
        for provider in &self.forward {
            match provider.resolve_address(query).await {
                Ok(address) => {
                    log::info!(
                        "resolution::orchestrator: {query} -> {address} via {}",
                        provider.provider()
                    );
                    let avatar = self.avatars.generate(address, Some(query)).await;
                    return Ok((address, avatar));
                }
                Err(ResolutionError::InvalidInput(_)) => {
                    log::debug!(
                        "resolution::orchestrator: {} does not handle {query}",
                        provider.provider()
                    );
                    last_error.get_or_insert(ResolutionError::InvalidInput(query.to_string()));
                }
                Err(e) => {
                    log::debug!(
                        "resolution::orchestrator: {} failed for {query}: {e}",
                        provider.provider()
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(Self::exhausted(query.to_string(), last_error))
    }

    /// Reverse-resolves `address` to a verified name plus a best-effort avatar.
    ///
    /// # Errors
    /// * [`ResolutionError::ResolutionFailed`] once all providers are exhausted. Its source
    ///   is a [`ResolutionError::ReverseResolutionMismatch`] if any provider returned one.
    pub async fn resolve_name(
        &self,
        address: Address,
    ) -> Result<(String, Option<AvatarImage>), ResolutionError> {
        for provider in &self.reverse {
            if let Some(name) = provider.cached_name(address) {
                log::debug!(
                    "resolution::orchestrator: {address} served from {} cache",
                    provider.provider()
                );
                let avatar = Self::offline_avatar(address);
                return Ok((name, avatar));
            }
        }

        let mut mismatch = None;
        let mut last_error = None;
        for provider in &self.reverse {
            match provider.resolve_name(address).await {
                Ok(name) => {
                    log::info!(
                        "resolution::orchestrator: {address} -> {name} via {}",
                        provider.provider()
                    );
                    let avatar = self.avatars.generate(address, Some(&name)).await;
                    return Ok((name, avatar));
                }
                Err(e @ ResolutionError::ReverseResolutionMismatch { .. }) => {
                    log::warn!(
                        "resolution::orchestrator: rejecting {} reverse record: {e}",
                        provider.provider()
                    );
                    mismatch = Some(e);
                }
                Err(e) => {
                    log::debug!(
                        "resolution::orchestrator: {} failed for {address}: {e}",
                        provider.provider()
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(Self::exhausted(address.to_string(), mismatch.or(last_error)))
    }

    // Cache hits stay off the network, including for avatars
    fn offline_avatar(address: Address) -> Option<AvatarImage> {
        Some(AvatarImage::Blockie(Blockie::for_address(&address)))
    }

    fn exhausted(query: String, last_error: Option<ResolutionError>) -> ResolutionError {
        let source = last_error.unwrap_or_else(|| ResolutionError::InvalidInput(query.clone()));
        log::info!("resolution::orchestrator: could not resolve {query}: {source}");
        ResolutionError::ResolutionFailed {
            query,
            source: Box::new(source),
        }
    }
}

impl Default for DomainResolutionOrchestrator {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new(), Arc::new(BlockieAvatars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chain::Chain;
    use crate::models::domain_record::ResolvedValue;
    use crate::resolution::cache::ResolutionCache;
    use crate::resolution::ens::abi;
    use crate::resolution::{DasResolver, EnsResolver, UnstoppableV1, UnstoppableV2};
    use crate::test_helpers::{addr, MockChainCaller, MockHttpClient};
    use crate::utils::constants::ENS_REGISTRY;
    use alloy::sol_types::SolValue;
    use async_trait::async_trait;
    use chrono::Duration;
    use serde_json::json;

    struct NoAvatars;

    #[async_trait]
    impl AvatarGenerator for NoAvatars {
        async fn generate(&self, _address: Address, _name: Option<&str>) -> Option<AvatarImage> {
            None
        }
    }

    struct Fixture {
        caller: Arc<MockChainCaller>,
        http: Arc<MockHttpClient>,
        ens_cache: ResolutionCache,
        orchestrator: DomainResolutionOrchestrator,
    }

    fn fixture(avatars: Arc<dyn AvatarGenerator>) -> Fixture {
        let caller = Arc::new(MockChainCaller::new());
        let http = Arc::new(MockHttpClient::new());
        let cache = || ResolutionCache::in_memory(Duration::days(7));
        let ens_cache = cache();

        let ens = Arc::new(EnsResolver::new(caller.clone(), ens_cache.clone(), cache()));
        let ud = Arc::new(UnstoppableV2::new(
            http.clone(),
            "https://ud.test",
            None,
            cache(),
            cache(),
        ));
        let das = Arc::new(DasResolver::new(http.clone(), "https://das.test", cache()));
        let ud_v1 = Arc::new(UnstoppableV1::new(http.clone(), "https://legacy.test", cache()));

        let forward: Vec<Arc<dyn AddressResolver>> = vec![ens.clone(), ud.clone(), das, ud_v1];
        let reverse: Vec<Arc<dyn NameResolver>> = vec![ens, ud];
        let orchestrator = DomainResolutionOrchestrator::new(forward, reverse, avatars);
        Fixture {
            caller,
            http,
            ens_cache,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn test_address_query_is_identity() {
        let f = fixture(Arc::new(BlockieAvatars));
        let query = "0xbc8dafeaca658ae0857c80d8aa6de4d487577c63";

        let (address, avatar) = f.orchestrator.resolve_address(query).await.unwrap();
        assert_eq!(address, parse_address(query).unwrap());
        assert_eq!(avatar, None);
        assert_eq!(f.caller.call_count(), 0);
        assert_eq!(f.http.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fresh_cache_hit_makes_no_calls() {
        let f = fixture(Arc::new(BlockieAvatars));
        f.ens_cache.put(
            "vitalik.eth",
            Chain::MAINNET,
            ResolvedValue::Address(addr(0xaa)),
        );

        let (address, avatar) = f.orchestrator.resolve_address("vitalik.eth").await.unwrap();
        assert_eq!(address, addr(0xaa));
        assert_eq!(avatar, Some(AvatarImage::Blockie(Blockie::for_address(&addr(0xaa)))));
        assert_eq!(f.caller.call_count(), 0);
        assert_eq!(f.http.call_count(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_unstoppable() {
        let f = fixture(Arc::new(NoAvatars));
        f.http.route(
            "/domains/brad.crypto",
            json!({ "meta": { "owner": addr(0x0b).to_string() } }),
        );

        let (address, avatar) = f.orchestrator.resolve_address("brad.crypto").await.unwrap();
        assert_eq!(address, addr(0x0b));
        assert_eq!(avatar, None);
        // ENS was tried first and failed on the unscripted registry call
        assert_eq!(f.caller.call_count(), 1);

        // The second lookup is served from the Unstoppable cache
        f.orchestrator.resolve_address("brad.crypto").await.unwrap();
        assert_eq!(f.http.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_input_skips_to_das() {
        let f = fixture(Arc::new(NoAvatars));
        f.http.route(
            "phone.bit",
            json!({ "data": { "records": [{ "key": "address.eth", "value": addr(0x0d).to_string() }] } }),
        );

        let (address, _) = f.orchestrator.resolve_address("phone.bit").await.unwrap();
        assert_eq!(address, addr(0x0d));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let f = fixture(Arc::new(NoAvatars));

        let result = f.orchestrator.resolve_address("nobody.crypto").await;
        match result {
            Err(ResolutionError::ResolutionFailed { query, source }) => {
                assert_eq!(query, "nobody.crypto");
                // UD v1 is last and got a 404 from the mock
                assert!(matches!(*source, ResolutionError::Network(_)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reverse_mismatch_is_terminal() {
        let f = fixture(Arc::new(NoAvatars));
        // ENS reverse record for 0xbb claims a name owned by 0xaa
        let resolver = addr(0x42);
        f.caller.respond::<abi::resolverCall>(
            ENS_REGISTRY,
            (resolver,).abi_encode_params(),
        );
        f.caller.respond::<abi::nameCall>(
            resolver,
            ("vitalik.eth".to_string(),).abi_encode_params(),
        );
        f.caller.respond::<abi::addrCall>(
            resolver,
            (addr(0xaa),).abi_encode_params(),
        );

        let result = f.orchestrator.resolve_name(addr(0xbb)).await;
        match result {
            Err(ResolutionError::ResolutionFailed { source, .. }) => {
                assert!(matches!(
                    *source,
                    ResolutionError::ReverseResolutionMismatch { .. }
                ));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reverse_success_with_avatar_failure() {
        let f = fixture(Arc::new(NoAvatars));
        f.http.route(
            "/reverse/",
            json!({ "meta": { "domain": "brad.crypto" } }),
        );
        f.http.route(
            "/domains/brad.crypto",
            json!({ "meta": { "owner": addr(0x0b).to_string() } }),
        );

        let (name, avatar) = f.orchestrator.resolve_name(addr(0x0b)).await.unwrap();
        assert_eq!(name, "brad.crypto");
        assert_eq!(avatar, None);
    }
}
