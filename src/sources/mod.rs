//! Per-chain token source.
//!
//! A [`TokenSourceProvider`] owns the token list of one (wallet, chain): it bootstraps
//! the native currency, writes autodetected tokens into the shared [`TokenStore`] and
//! keeps balances fresh, refreshing whenever the chain moves to a new block (at most
//! once per `balance_interval`).

use alloy::primitives::Address;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::balances::TokenBalanceFetcher;
use crate::chain::ChainCaller;
use crate::detection::TokenAutoDetector;
use crate::discovery::ContractInteractionDiscoverer;
use crate::models::chain::Chain;
use crate::models::token::{BalanceRefreshPolicy, Token, TokenKey};
use crate::session::WalletSession;
use crate::store::{TokenSnapshot, TokenStore};

const DETECTED_CHANNEL_SIZE: usize = 16;

pub struct TokenSourceProvider {
    session: WalletSession,
    store: Arc<TokenStore>,
    detector: TokenAutoDetector,
    fetcher: Arc<TokenBalanceFetcher>,
    balance_interval: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TokenSourceProvider {
    pub fn new(
        session: WalletSession,
        store: Arc<TokenStore>,
        detector: TokenAutoDetector,
        fetcher: TokenBalanceFetcher,
        balance_interval: Duration,
    ) -> Self {
        Self {
            session,
            store,
            detector,
            fetcher: Arc::new(fetcher),
            balance_interval,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub const fn chain(&self) -> Chain {
        self.session.chain
    }

    pub const fn session(&self) -> &WalletSession {
        &self.session
    }

    /// Bootstraps the native token and starts detection, the chain poller and the
    /// block-driven balance refresh. Starting twice restarts everything.
    pub fn start(&self) {
        self.stop();
        let chain = self.chain();
        self.store.bootstrap_native(chain);
        self.session.chain_state.start();

        let (detected_tx, detected_rx) = mpsc::channel(DETECTED_CHANNEL_SIZE);
        self.detector.start(detected_tx);

        let forwarder = tokio::spawn(forward_detected(
            detected_rx,
            self.store.clone(),
            self.fetcher.clone(),
        ));
        let refresher = tokio::spawn(refresh_on_blocks(
            chain,
            self.session.chain_state.subscribe(),
            self.store.clone(),
            self.fetcher.clone(),
            self.balance_interval,
        ));

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend([forwarder, refresher]);
        }
        log::info!(
            "sources: started token source for {} on chain {chain}",
            self.session.wallet
        );
    }

    /// Cancels detection and background refreshes. Nothing is written to the store
    /// for this chain by this provider afterwards.
    pub fn stop(&self) {
        self.detector.stop();
        self.session.chain_state.stop();
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }

    /// Synchronous snapshot of this chain's tokens.
    pub fn tokens(&self) -> Vec<Token> {
        self.store.tokens(self.chain())
    }

    /// Change stream: the current snapshot, then every change.
    pub fn observe(&self) -> watch::Receiver<TokenSnapshot> {
        self.store.observe(self.chain())
    }

    /// Forces observers to receive a fresh snapshot.
    pub fn refresh(&self) {
        self.store.notify(self.chain());
    }

    /// Refreshes balances of the tokens selected by `policy`. Returns how many tokens
    /// changed.
    pub async fn refresh_balance(&self, policy: &BalanceRefreshPolicy) -> usize {
        let tokens = self.select(policy);
        refresh_tokens(&self.store, &self.fetcher, &tokens).await
    }

    fn select(&self, policy: &BalanceRefreshPolicy) -> Vec<Token> {
        let chain = self.chain();
        let lookup = |key: &TokenKey| {
            (key.chain == chain)
                .then(|| self.store.token(key))
                .flatten()
        };
        match policy {
            BalanceRefreshPolicy::All => self.store.enabled_tokens(chain),
            BalanceRefreshPolicy::NativeOnly => {
                lookup(&TokenKey::native(chain)).into_iter().collect()
            }
            BalanceRefreshPolicy::Token(key) => lookup(key).into_iter().collect(),
            BalanceRefreshPolicy::Tokens(keys) => keys.iter().filter_map(lookup).collect(),
        }
    }

    /// Detection without the timer, for one-shot use.
    pub async fn detect_once(&self) -> Vec<Token> {
        let detected = self.detector.run_once().await;
        let inserted = self.store.mark_detected(detected);
        refresh_tokens(&self.store, &self.fetcher, &inserted).await;
        inserted
    }
}

impl Drop for TokenSourceProvider {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn refresh_tokens(store: &TokenStore, fetcher: &TokenBalanceFetcher, tokens: &[Token]) -> usize {
    if tokens.is_empty() {
        return 0;
    }
    let updates = fetcher.refresh_balance(tokens).await;
    store.update_many(updates.into_iter().map(|update| (update.key, update.action)))
}

async fn forward_detected(
    mut detected: mpsc::Receiver<Vec<Token>>,
    store: Arc<TokenStore>,
    fetcher: Arc<TokenBalanceFetcher>,
) {
    while let Some(tokens) = detected.recv().await {
        let inserted = store.mark_detected(tokens);
        if inserted.is_empty() {
            continue;
        }
        log::info!("sources: {} detected tokens added", inserted.len());
        refresh_tokens(&store, &fetcher, &inserted).await;
    }
}

async fn refresh_on_blocks(
    chain: Chain,
    mut blocks: watch::Receiver<Option<u64>>,
    store: Arc<TokenStore>,
    fetcher: Arc<TokenBalanceFetcher>,
    min_interval: Duration,
) {
    loop {
        let tokens = store.enabled_tokens(chain);
        let changed = refresh_tokens(&store, &fetcher, &tokens).await;
        log::debug!(
            "sources: refreshed {} balances on chain {chain} at block {:?}, {changed} changed",
            tokens.len(),
            *blocks.borrow()
        );

        tokio::time::sleep(min_interval).await;
        if blocks.changed().await.is_err() {
            break;
        }
    }
}

/// Builds token source providers with shared collaborators.
pub struct TokenSourceFactory {
    caller: Arc<dyn ChainCaller>,
    discoverer: Option<Arc<ContractInteractionDiscoverer>>,
    popular: HashMap<Chain, Vec<Address>>,
    multicall: Option<Address>,
    autodetect_interval: Duration,
    balance_interval: Duration,
}

impl TokenSourceFactory {
    pub fn new(
        caller: Arc<dyn ChainCaller>,
        discoverer: Option<Arc<ContractInteractionDiscoverer>>,
        popular: HashMap<Chain, Vec<Address>>,
        multicall: Option<Address>,
        autodetect_interval: Duration,
        balance_interval: Duration,
    ) -> Self {
        Self {
            caller,
            discoverer,
            popular,
            multicall,
            autodetect_interval,
            balance_interval,
        }
    }

    pub fn create(&self, session: WalletSession, store: Arc<TokenStore>) -> TokenSourceProvider {
        let detector = TokenAutoDetector::new(
            session.wallet,
            session.chain,
            store.clone(),
            self.discoverer.clone(),
            self.caller.clone(),
            self.popular.get(&session.chain).cloned().unwrap_or_default(),
            self.autodetect_interval,
        );
        let fetcher = TokenBalanceFetcher::new(
            self.caller.clone(),
            session.wallet,
            session.chain,
            self.multicall,
        );
        TokenSourceProvider::new(session, store, detector, fetcher, self.balance_interval)
    }
}
