//! Cross-chain token aggregation.
//!
//! [`TokensService`] keeps exactly one [`TokenSourceProvider`] per active chain and
//! fans their change streams into a single published token list. The merge step
//! applies [`TokenFilterPolicy`]: native-currency mirrors collapse into the native
//! entry and, if configured, zero-balance detected tokens are hidden.

use alloy::primitives::Address;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::detection::ContractClassifier;
use crate::error::TokenError;
use crate::models::chain::{Chain, CHAINS};
use crate::models::token::{
    BalanceRefreshPolicy, Token, TokenKey, TokenSource, TokenType, TokenUpdateAction,
};
use crate::session::WalletSession;
use crate::sources::{TokenSourceFactory, TokenSourceProvider};
use crate::store::{TokenSnapshot, TokenStore};

#[derive(Debug, Clone, Default)]
pub struct TokenFilterPolicy {
    /// ERC20 contracts that mirror a chain's native currency
    pub native_erc20: HashMap<Chain, Address>,
    pub hide_zero_balance: bool,
}

impl TokenFilterPolicy {
    /// Mirrors from the chain catalogue.
    pub fn from_catalogue(hide_zero_balance: bool) -> Self {
        let native_erc20 = CHAINS
            .iter()
            .filter_map(|info| info.native_erc20.map(|mirror| (info.chain, mirror)))
            .collect();
        Self {
            native_erc20,
            hide_zero_balance,
        }
    }

    /// Flattens per-chain snapshots into one list: hidden tokens dropped, one native
    /// entry per chain, spurious tokens filtered. Sorted by chain, native first, then
    /// by symbol.
    pub fn merge<'a>(&self, snapshots: impl IntoIterator<Item = &'a [Token]>) -> Vec<Token> {
        let tokens: Vec<&Token> = snapshots
            .into_iter()
            .flatten()
            .filter(|token| !token.hidden && !token.deleted)
            .collect();
        let with_native: HashSet<Chain> = tokens
            .iter()
            .filter(|token| token.key.is_native())
            .map(|token| token.chain())
            .collect();

        let mut merged: Vec<Token> = tokens
            .into_iter()
            .filter(|token| !self.is_mirror(token) || !with_native.contains(&token.chain()))
            .filter(|token| !self.is_spurious(token))
            .cloned()
            .collect();
        merged.sort_by(|a, b| {
            (a.chain(), !a.key.is_native(), a.symbol.to_lowercase(), a.contract()).cmp(&(
                b.chain(),
                !b.key.is_native(),
                b.symbol.to_lowercase(),
                b.contract(),
            ))
        });
        merged
    }

    fn is_mirror(&self, token: &Token) -> bool {
        token.token_type == TokenType::Erc20
            && self.native_erc20.get(&token.chain()) == Some(&token.contract())
    }

    fn is_spurious(&self, token: &Token) -> bool {
        self.hide_zero_balance && token.source == TokenSource::Detected && token.balance.is_zero()
    }
}

/// Forwarders feeding the aggregator, one per provider.
struct Aggregation {
    forwarders: Vec<JoinHandle<()>>,
    aggregator: JoinHandle<()>,
}

impl Aggregation {
    fn abort(&self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
        self.aggregator.abort();
    }
}

pub struct TokensService {
    store: Arc<TokenStore>,
    factory: TokenSourceFactory,
    classifier: ContractClassifier,
    policy: Arc<TokenFilterPolicy>,
    providers: Mutex<HashMap<Chain, Arc<TokenSourceProvider>>>,
    publisher: watch::Sender<TokenSnapshot>,
    aggregation: Mutex<Option<Aggregation>>,
}

impl TokensService {
    pub fn new(
        store: Arc<TokenStore>,
        factory: TokenSourceFactory,
        classifier: ContractClassifier,
        policy: TokenFilterPolicy,
    ) -> Self {
        Self {
            store,
            factory,
            classifier,
            policy: Arc::new(policy),
            providers: Mutex::new(HashMap::new()),
            publisher: watch::channel(Arc::new(Vec::new())).0,
            aggregation: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    fn providers(&self) -> MutexGuard<'_, HashMap<Chain, Arc<TokenSourceProvider>>> {
        self.providers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Activates `sessions`. Providers of chains that stay active are kept running,
    /// providers of chains no longer listed are stopped.
    pub fn start(&self, sessions: Vec<WalletSession>) {
        let wallet = self.store.wallet();
        let mut providers = self.providers();

        let active: HashSet<Chain> = sessions.iter().map(|session| session.chain).collect();
        providers.retain(|chain, provider| {
            let keep = active.contains(chain);
            if !keep {
                provider.stop();
                log::info!("service: chain {chain} deactivated");
            }
            keep
        });

        for session in sessions {
            if session.wallet != wallet {
                log::warn!(
                    "service: ignoring session of {} on chain {}, store belongs to {wallet}",
                    session.wallet,
                    session.chain
                );
                continue;
            }
            if providers.contains_key(&session.chain) {
                continue;
            }
            let chain = session.chain;
            let provider = Arc::new(self.factory.create(session, self.store.clone()));
            provider.start();
            providers.insert(chain, provider);
        }

        let providers: Vec<Arc<TokenSourceProvider>> = providers.values().cloned().collect();
        self.restart_aggregation(&providers);
    }

    fn restart_aggregation(&self, providers: &[Arc<TokenSourceProvider>]) {
        let mut aggregation = self
            .aggregation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = aggregation.take() {
            previous.abort();
        }

        let (tx, mut rx) = mpsc::channel::<(Chain, TokenSnapshot)>(providers.len().max(1) * 4);
        let forwarders = providers
            .iter()
            .map(|provider| {
                let chain = provider.chain();
                let mut snapshots = provider.observe();
                let tx = tx.clone();
                tokio::spawn(async move {
                    loop {
                        let snapshot = snapshots.borrow_and_update().clone();
                        if tx.send((chain, snapshot)).await.is_err() {
                            break;
                        }
                        if snapshots.changed().await.is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        drop(tx);

        let publisher = self.publisher.clone();
        let policy = self.policy.clone();
        let active: HashSet<Chain> = providers.iter().map(|p| p.chain()).collect();
        let aggregator = tokio::spawn(async move {
            let mut latest: BTreeMap<Chain, TokenSnapshot> = BTreeMap::new();
            if active.is_empty() {
                publisher.send_replace(Arc::new(Vec::new()));
            }
            while let Some((chain, snapshot)) = rx.recv().await {
                latest.insert(chain, snapshot);
                let merged = policy.merge(latest.values().map(|s| s.as_slice()));
                publisher.send_replace(Arc::new(merged));
            }
        });

        *aggregation = Some(Aggregation {
            forwarders,
            aggregator,
        });
    }

    /// Aggregated token list of every active chain: the current value, then every
    /// change.
    pub fn tokens_publisher(&self) -> watch::Receiver<TokenSnapshot> {
        self.publisher.subscribe()
    }

    /// Latest aggregated list.
    pub fn tokens(&self) -> TokenSnapshot {
        self.publisher.borrow().clone()
    }

    pub fn active_chains(&self) -> Vec<Chain> {
        let mut chains: Vec<Chain> = self.providers().keys().copied().collect();
        chains.sort();
        chains
    }

    pub fn provider(&self, chain: Chain) -> Option<Arc<TokenSourceProvider>> {
        self.providers().get(&chain).cloned()
    }

    fn active_providers(&self) -> Vec<Arc<TokenSourceProvider>> {
        self.providers().values().cloned().collect()
    }

    pub fn refresh(&self) {
        for provider in self.active_providers() {
            provider.refresh();
        }
    }

    /// Refreshes balances on every active chain. Returns how many tokens changed.
    pub async fn refresh_balance(&self, policy: &BalanceRefreshPolicy) -> usize {
        let providers = self.active_providers();
        join_all(providers.iter().map(|p| p.refresh_balance(policy)))
            .await
            .into_iter()
            .sum()
    }

    /// # Errors
    /// * [`TokenError::UnknownToken`] if `key` is not in the store
    pub fn mark(&self, key: TokenKey, hidden: bool) -> Result<(), TokenError> {
        self.store.mark(key, hidden)
    }

    pub fn update(&self, key: TokenKey, action: TokenUpdateAction) -> bool {
        self.store.update(key, action)
    }

    /// Adds user-requested tokens. Every contract is classified first; nothing is
    /// added unless all of them are tokens on active chains.
    ///
    /// # Errors
    /// * [`TokenError::ChainNotActive`] if a key's chain has no provider
    /// * [`TokenError::NotATokenContract`] if a contract matches no token interface
    /// * [`TokenError::ChainCall`] if a contract could not be queried
    pub async fn add_custom(&self, keys: Vec<TokenKey>) -> Result<Vec<Token>, TokenError> {
        let active: HashSet<Chain> = self.providers().keys().copied().collect();
        if let Some(key) = keys.iter().find(|key| !active.contains(&key.chain)) {
            return Err(TokenError::ChainNotActive(key.chain));
        }

        let classified = join_all(
            keys.iter()
                .map(|key| self.classifier.classify(key.chain, key.contract)),
        )
        .await;
        let tokens = keys
            .iter()
            .zip(classified)
            .map(|(key, classified)| -> Result<Token, TokenError> {
                classified?
                    .map(|c| c.into_token(key.chain, TokenSource::Custom))
                    .ok_or(TokenError::NotATokenContract {
                        contract: key.contract,
                        chain: key.chain,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let added: Vec<Token> = tokens
            .into_iter()
            .map(|token| self.store.add_custom(token))
            .collect();
        log::info!("service: {} custom tokens added", added.len());

        let keys: Vec<TokenKey> = added.iter().map(|token| token.key).collect();
        self.refresh_balance(&BalanceRefreshPolicy::Tokens(keys)).await;
        Ok(added)
    }

    /// Stops every provider and the aggregation.
    pub fn stop(&self) {
        for (_, provider) in self.providers().drain() {
            provider.stop();
        }
        if let Some(aggregation) = self
            .aggregation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            aggregation.abort();
        }
    }
}

impl Drop for TokensService {
    fn drop(&mut self) {
        self.stop();
    }
}
