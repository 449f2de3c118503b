//! ENS forward/reverse resolution and avatar text records, via the on-chain registry.

use alloy::primitives::{keccak256, Address, B256};
use async_trait::async_trait;
use std::sync::Arc;

use super::cache::ResolutionCache;
use super::{normalize_domain, verify_reverse, AddressResolver, NameResolver, ResolutionProvider};
use crate::chain::{call_contract, ChainCaller};
use crate::error::ResolutionError;
use crate::models::chain::Chain;
use crate::models::domain_record::ResolvedValue;
use crate::utils::constants::ENS_REGISTRY;

pub(crate) mod abi {
    alloy::sol! {
        function resolver(bytes32 node) external view returns (address);
        function addr(bytes32 node) external view returns (address);
        function name(bytes32 node) external view returns (string);
        function text(bytes32 node, string key) external view returns (string);
    }
}

/// Compute the ENS namehash for a domain name (EIP-137).
pub fn namehash(name: &str) -> B256 {
    let mut node = B256::ZERO;
    if name.is_empty() {
        return node;
    }
    for label in name.rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(node.as_slice());
        buf[32..].copy_from_slice(label_hash.as_slice());
        node = keccak256(buf);
    }
    node
}

/// Name of the reverse record node for `address`
fn reverse_name(address: Address) -> String {
    format!("{}.addr.reverse", hex::encode(address.as_slice()))
}

pub struct EnsResolver {
    caller: Arc<dyn ChainCaller>,
    chain: Chain,
    registry: Address,
    forward_cache: ResolutionCache,
    reverse_cache: ResolutionCache,
}

impl EnsResolver {
    pub fn new(
        caller: Arc<dyn ChainCaller>,
        forward_cache: ResolutionCache,
        reverse_cache: ResolutionCache,
    ) -> Self {
        Self {
            caller,
            chain: Chain::MAINNET,
            registry: ENS_REGISTRY,
            forward_cache,
            reverse_cache,
        }
    }

    async fn resolver_for(&self, node: B256) -> Result<Option<Address>, ResolutionError> {
        let resolver = call_contract(
            self.caller.as_ref(),
            self.chain,
            self.registry,
            abi::resolverCall { node },
        )
        .await?
        ._0;
        Ok((!resolver.is_zero()).then_some(resolver))
    }

    /// The `avatar` text record of `name`, if one is set.
    ///
    /// # Errors
    /// * [`ResolutionError::InvalidInput`] for malformed names
    /// * Chain call failures
    pub async fn avatar(&self, name: &str) -> Result<Option<String>, ResolutionError> {
        let name = normalize_domain(name)?;
        let node = namehash(&name);
        let Some(resolver) = self.resolver_for(node).await? else {
            return Ok(None);
        };
        let avatar = call_contract(
            self.caller.as_ref(),
            self.chain,
            resolver,
            abi::textCall {
                node,
                key: "avatar".to_string(),
            },
        )
        .await?
        ._0;
        let avatar = avatar.trim().to_string();
        Ok((!avatar.is_empty()).then_some(avatar))
    }
}

impl ResolutionProvider for EnsResolver {
    fn provider(&self) -> &'static str {
        "ens"
    }
}

#[async_trait]
impl AddressResolver for EnsResolver {
    fn cached_address(&self, name: &str) -> Option<Address> {
        self.forward_cache.get(name, self.chain)?.as_address()
    }

    async fn resolve_address(&self, name: &str) -> Result<Address, ResolutionError> {
        let name = normalize_domain(name)?;
        let node = namehash(&name);

        let Some(resolver) = self.resolver_for(node).await? else {
            return Err(ResolutionError::AddressNotFound(name));
        };
        let address = call_contract(
            self.caller.as_ref(),
            self.chain,
            resolver,
            abi::addrCall { node },
        )
        .await?
        ._0;
        if address.is_zero() {
            return Err(ResolutionError::AddressNotFound(name));
        }

        log::debug!("resolution::ens: {name} -> {address}");
        self.forward_cache
            .put(&name, self.chain, ResolvedValue::Address(address));
        Ok(address)
    }
}

#[async_trait]
impl NameResolver for EnsResolver {
    fn cached_name(&self, address: Address) -> Option<String> {
        self.reverse_cache
            .get(&address.to_string(), self.chain)?
            .as_name()
            .map(str::to_string)
    }

    async fn resolve_name(&self, address: Address) -> Result<String, ResolutionError> {
        let node = namehash(&reverse_name(address));

        let Some(resolver) = self.resolver_for(node).await? else {
            return Err(ResolutionError::NameNotFound(address));
        };
        let name = call_contract(
            self.caller.as_ref(),
            self.chain,
            resolver,
            abi::nameCall { node },
        )
        .await?
        ._0;
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return Err(ResolutionError::NameNotFound(address));
        }

        let name = verify_reverse(self, address, name).await?;
        self.reverse_cache.put(
            &address.to_string(),
            self.chain,
            ResolvedValue::Name(name.clone()),
        );
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{addr, MockChainCaller};
    use alloy::primitives::b256;
    use alloy::sol_types::SolValue;
    use chrono::Duration;

    fn resolver_with(caller: Arc<MockChainCaller>) -> EnsResolver {
        EnsResolver::new(
            caller,
            ResolutionCache::in_memory(Duration::days(7)),
            ResolutionCache::in_memory(Duration::days(7)),
        )
    }

    /// Registry points every node at `resolver`; `name` forward-resolves to `owner`.
    fn script_forward(caller: &MockChainCaller, resolver: Address, name: &str, owner: Address) {
        caller.respond::<abi::resolverCall>(ENS_REGISTRY, (resolver,).abi_encode_params());
        caller.respond_exact(
            resolver,
            &abi::addrCall {
                node: namehash(name),
            },
            (owner,).abi_encode_params(),
        );
    }

    fn script_reverse(caller: &MockChainCaller, resolver: Address, address: Address, name: &str) {
        caller.respond_exact(
            resolver,
            &abi::nameCall {
                node: namehash(&reverse_name(address)),
            },
            (name.to_string(),).abi_encode_params(),
        );
    }

    #[test]
    fn test_namehash_vectors() {
        assert_eq!(namehash(""), B256::ZERO);
        assert_eq!(
            namehash("eth"),
            b256!("0x93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae")
        );
        assert_eq!(
            namehash("foo.eth"),
            b256!("0xde9b09fd7c5f901e23a3f19fecc54828e9c848539801e86591bd9801b019f84f")
        );
    }

    #[tokio::test]
    async fn test_forward_resolution_caches() {
        let caller = Arc::new(MockChainCaller::new());
        script_forward(&caller, addr(0x42), "vitalik.eth", addr(0xaa));
        let ens = resolver_with(caller.clone());

        assert_eq!(ens.cached_address("vitalik.eth"), None);
        assert_eq!(ens.resolve_address("Vitalik.eth").await.unwrap(), addr(0xaa));
        assert_eq!(ens.cached_address("vitalik.eth"), Some(addr(0xaa)));
        assert_eq!(caller.call_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_input_makes_no_calls() {
        let caller = Arc::new(MockChainCaller::new());
        let ens = resolver_with(caller.clone());

        let result = ens.resolve_address("vitalik").await;
        assert!(matches!(result, Err(ResolutionError::InvalidInput(_))));
        assert_eq!(caller.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_resolver_is_not_found() {
        let caller = Arc::new(MockChainCaller::new());
        caller.respond::<abi::resolverCall>(ENS_REGISTRY, (Address::ZERO,).abi_encode_params());
        let ens = resolver_with(caller);

        let result = ens.resolve_address("nobody.eth").await;
        assert_eq!(
            result,
            Err(ResolutionError::AddressNotFound("nobody.eth".to_string()))
        );
        assert_eq!(ens.cached_address("nobody.eth"), None);
    }

    #[tokio::test]
    async fn test_reverse_round_trip() {
        let caller = Arc::new(MockChainCaller::new());
        script_forward(&caller, addr(0x42), "vitalik.eth", addr(0xaa));
        script_reverse(&caller, addr(0x42), addr(0xaa), "vitalik.eth");
        let ens = resolver_with(caller);

        assert_eq!(ens.resolve_name(addr(0xaa)).await.unwrap(), "vitalik.eth");
        assert_eq!(ens.cached_name(addr(0xaa)), Some("vitalik.eth".to_string()));
    }

    #[tokio::test]
    async fn test_reverse_mismatch_is_rejected() {
        let caller = Arc::new(MockChainCaller::new());
        // 0xbb claims vitalik.eth, which belongs to 0xaa
        script_forward(&caller, addr(0x42), "vitalik.eth", addr(0xaa));
        script_reverse(&caller, addr(0x42), addr(0xbb), "vitalik.eth");
        let ens = resolver_with(caller);

        let result = ens.resolve_name(addr(0xbb)).await;
        assert_eq!(
            result,
            Err(ResolutionError::ReverseResolutionMismatch {
                address: addr(0xbb),
                name: "vitalik.eth".to_string(),
                resolved: addr(0xaa),
            })
        );
        assert_eq!(ens.cached_name(addr(0xbb)), None);
    }

    #[tokio::test]
    async fn test_avatar_record() {
        let caller = Arc::new(MockChainCaller::new());
        script_forward(&caller, addr(0x42), "vitalik.eth", addr(0xaa));
        caller.respond::<abi::textCall>(
            addr(0x42),
            ("https://example.com/v.png".to_string(),).abi_encode_params(),
        );
        let ens = resolver_with(caller);

        assert_eq!(
            ens.avatar("vitalik.eth").await.unwrap(),
            Some("https://example.com/v.png".to_string())
        );
    }
}
