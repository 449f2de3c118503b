//! Application context wiring configuration into concrete collaborators.
//!
//! Builds the chain-call and HTTP capabilities once and shares them between the
//! name resolution stack and the token services.

use alloy::primitives::Address;
use alloy::providers::MULTICALL3_ADDRESS;
use chrono::Duration as ChronoDuration;
use eyre::{Result, WrapErr};
use log::info;
use std::sync::Arc;
use std::time::Duration;

use crate::chain::{ChainCaller, RpcChainCaller};
use crate::config::Config;
use crate::detection::ContractClassifier;
use crate::discovery::ContractInteractionDiscoverer;
use crate::models::chain::Chain;
use crate::net::{HttpClient, ReqwestHttpClient};
use crate::resolution::{
    AddressResolver, DasResolver, DiskRecordStore, DomainResolutionOrchestrator, EnsAvatars,
    EnsResolver, MemoryRecordStore, NameResolver, RecordStore, ResolutionCache, UnstoppableV1,
    UnstoppableV2,
};
use crate::service::{TokenFilterPolicy, TokensService};
use crate::session::WalletSession;
use crate::sources::TokenSourceFactory;
use crate::store::TokenStore;
use crate::utils::constants::{
    DAS_INDEXER_API, HTTP_TIMEOUT_SECS, UNSTOPPABLE_V1_API, UNSTOPPABLE_V2_API,
};

/// Application context holding shared capabilities.
pub struct AppContext {
    pub config: Config,
    pub caller: Arc<dyn ChainCaller>,
    pub http: Arc<dyn HttpClient>,
    pub resolver: DomainResolutionOrchestrator,
}

impl AppContext {
    /// Creates a new application context from `config`.
    ///
    /// # Errors
    /// * If an RPC endpoint is missing or malformed
    /// * If the HTTP client cannot be built
    pub fn new(config: Config) -> Result<Self> {
        let rpc_urls = config.rpc_urls()?;
        for (chain, url) in &rpc_urls {
            info!("Using RPC endpoint {url} for chain {chain}");
        }
        let caller: Arc<dyn ChainCaller> = Arc::new(RpcChainCaller::new(&rpc_urls));
        let http: Arc<dyn HttpClient> = Arc::new(
            ReqwestHttpClient::new(Duration::from_secs(HTTP_TIMEOUT_SECS))
                .wrap_err("failed to build HTTP client")?,
        );
        let resolver = Self::build_resolver(&config, &caller, &http)?;

        Ok(Self {
            config,
            caller,
            http,
            resolver,
        })
    }

    fn cache(config: &Config, namespace: &str) -> Result<ResolutionCache> {
        let expiration = ChronoDuration::from_std(config.domain_cache_ttl)
            .wrap_err("DOMAIN_CACHE_TTL_SECS out of range")?;
        let store: Arc<dyn RecordStore> = match &config.domain_cache_dir {
            Some(dir) => Arc::new(DiskRecordStore::new(dir, namespace)),
            None => Arc::new(MemoryRecordStore::new()),
        };
        Ok(ResolutionCache::new(store, expiration))
    }

    /// Forward order: ENS, Unstoppable v2, DAS, Unstoppable v1. Reverse order: ENS,
    /// Unstoppable v2.
    fn build_resolver(
        config: &Config,
        caller: &Arc<dyn ChainCaller>,
        http: &Arc<dyn HttpClient>,
    ) -> Result<DomainResolutionOrchestrator> {
        if let Some(dir) = &config.domain_cache_dir {
            info!("Persisting domain records under {}", dir.display());
        }

        let ens = Arc::new(EnsResolver::new(
            caller.clone(),
            Self::cache(config, "ens")?,
            Self::cache(config, "ens-reverse")?,
        ));
        let unstoppable = Arc::new(UnstoppableV2::new(
            http.clone(),
            UNSTOPPABLE_V2_API,
            config.unstoppable_api_key.clone(),
            Self::cache(config, "unstoppable")?,
            Self::cache(config, "unstoppable-reverse")?,
        ));
        let das = Arc::new(DasResolver::new(
            http.clone(),
            DAS_INDEXER_API,
            Self::cache(config, "das")?,
        ));
        let unstoppable_v1 = Arc::new(UnstoppableV1::new(
            http.clone(),
            UNSTOPPABLE_V1_API,
            Self::cache(config, "unstoppable-v1")?,
        ));

        let forward: Vec<Arc<dyn AddressResolver>> =
            vec![ens.clone(), unstoppable.clone(), das, unstoppable_v1];
        let reverse: Vec<Arc<dyn NameResolver>> = vec![ens.clone(), unstoppable];
        Ok(DomainResolutionOrchestrator::new(
            forward,
            reverse,
            Arc::new(EnsAvatars::new(ens)),
        ))
    }

    pub fn discoverer(&self) -> Arc<ContractInteractionDiscoverer> {
        Arc::new(ContractInteractionDiscoverer::new(
            self.http.clone(),
            self.config.explorer_endpoints(),
            self.config.explorer_page_size,
        ))
    }

    pub fn source_factory(&self) -> TokenSourceFactory {
        TokenSourceFactory::new(
            self.caller.clone(),
            Some(self.discoverer()),
            self.config.popular_tokens(),
            Some(MULTICALL3_ADDRESS),
            self.config.autodetect_interval,
            self.config.balance_refresh_interval,
        )
    }

    /// Token service for `wallet`, not started.
    pub fn tokens_service(&self, wallet: Address) -> TokensService {
        TokensService::new(
            Arc::new(TokenStore::new(wallet)),
            self.source_factory(),
            ContractClassifier::new(self.caller.clone()),
            TokenFilterPolicy::from_catalogue(self.config.hide_zero_balance),
        )
    }

    /// One session per enabled chain.
    pub fn sessions(&self, wallet: Address) -> Vec<WalletSession> {
        WalletSession::for_chains(
            wallet,
            &self.config.chains,
            &self.caller,
            self.config.block_poll_interval,
        )
    }

    /// Session of `wallet` on a single chain.
    pub fn session(&self, wallet: Address, chain: Chain) -> WalletSession {
        WalletSession::new(
            wallet,
            chain,
            self.caller.clone(),
            self.config.block_poll_interval,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_wires_enabled_chains() {
        let mut config = Config::test_config();
        config.chains = vec![Chain::MAINNET, Chain::BASE];
        let context = AppContext::new(config).unwrap();

        let wallet = Address::new([0xee; 20]);
        let sessions = context.sessions(wallet);
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|s| s.wallet == wallet));

        let discoverer = context.discoverer();
        assert!(discoverer.supports(Chain::BASE));
        assert!(!discoverer.supports(Chain::POLYGON));
    }

    #[tokio::test]
    async fn test_identity_resolution_needs_no_network() {
        let context = AppContext::new(Config::test_config()).unwrap();
        let (address, avatar) = context
            .resolver
            .resolve_address("0xbc8dafeaca658ae0857c80d8aa6de4d487577c63")
            .await
            .unwrap();
        assert_eq!(
            address,
            "0xbc8dafeaca658ae0857c80d8aa6de4d487577c63".parse::<Address>().unwrap()
        );
        assert!(avatar.is_none());
    }
}
