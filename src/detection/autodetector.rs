//! Background token autodetection for one (wallet, chain).
//!
//! Two phases feed the classifier:
//! * transacted: contracts from the wallet's explorer history, resumed from per-kind
//!   watermarks kept in the token store
//! * owned: well-known token contracts the wallet holds a balance of
//!
//! Each phase runs on its own [`SerialQueue`], so a phase never overlaps itself while
//! the two phases may run side by side. A timer re-triggers both; a trigger that finds
//! its queue busy is dropped.

use alloy::primitives::{Address, U256};
use futures::future::join_all;
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::classifier::ContractClassifier;
use crate::balances::abi::IERC20;
use crate::chain::{call_contract, ChainCaller};
use crate::discovery::{ContractInteractionDiscoverer, DiscoveryKind};
use crate::models::chain::Chain;
use crate::models::token::{NonFungibleBalance, Token, TokenBalance, TokenKey, TokenSource, TokenType};
use crate::store::TokenStore;
use crate::utils::work_queue::SerialQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionPhase {
    Transacted,
    Owned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionState {
    Idle,
    DiscoveringTransacted,
    DiscoveringOwned,
    ClassifyingContracts,
}

struct Detector {
    wallet: Address,
    chain: Chain,
    store: Arc<TokenStore>,
    discoverer: Option<Arc<ContractInteractionDiscoverer>>,
    classifier: ContractClassifier,
    caller: Arc<dyn ChainCaller>,
    popular: Vec<Address>,
    emitted: Mutex<HashSet<Address>>,
    rejected: Mutex<HashSet<Address>>,
    states: Mutex<HashMap<DetectionPhase, DetectionState>>,
}

struct Running {
    transacted: Arc<SerialQueue>,
    owned: Arc<SerialQueue>,
    timer: JoinHandle<()>,
}

pub struct TokenAutoDetector {
    detector: Arc<Detector>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl TokenAutoDetector {
    pub fn new(
        wallet: Address,
        chain: Chain,
        store: Arc<TokenStore>,
        discoverer: Option<Arc<ContractInteractionDiscoverer>>,
        caller: Arc<dyn ChainCaller>,
        popular: Vec<Address>,
        interval: Duration,
    ) -> Self {
        let detector = Detector {
            wallet,
            chain,
            store,
            discoverer,
            classifier: ContractClassifier::new(caller.clone()),
            caller,
            popular,
            emitted: Mutex::new(HashSet::new()),
            rejected: Mutex::new(HashSet::new()),
            states: Mutex::new(HashMap::new()),
        };
        Self {
            detector: Arc::new(detector),
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn state(&self, phase: DetectionPhase) -> DetectionState {
        self.detector.state(phase)
    }

    /// Starts periodic detection, sending each batch of new tokens to `output`.
    /// Restarting replaces the previous queues and output.
    pub fn start(&self, output: mpsc::Sender<Vec<Token>>) {
        self.stop();

        let transacted = Arc::new(SerialQueue::new("autodetect-transacted"));
        let owned = Arc::new(SerialQueue::new("autodetect-owned"));

        let timer = {
            let detector = self.detector.clone();
            let transacted = transacted.clone();
            let owned = owned.clone();
            let interval = self.interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    if output.is_closed() {
                        break;
                    }

                    let (detector_t, output_t) = (detector.clone(), output.clone());
                    transacted.try_enqueue(
                        async move {
                            let tokens = detector_t.detect_transacted().await;
                            emit(&output_t, tokens).await;
                        }
                        .boxed(),
                    );

                    let (detector_o, output_o) = (detector.clone(), output.clone());
                    owned.try_enqueue(
                        async move {
                            let tokens = detector_o.detect_owned().await;
                            emit(&output_o, tokens).await;
                        }
                        .boxed(),
                    );
                }
            })
        };

        log::info!(
            "detection::autodetector: started for {} on chain {} every {:?}",
            self.detector.wallet,
            self.detector.chain,
            self.interval
        );
        if let Ok(mut slot) = self.running.lock() {
            *slot = Some(Running {
                transacted,
                owned,
                timer,
            });
        }
    }

    /// Cancels the timer and both queues, dropping any detection in flight. Contracts
    /// emitted so far become eligible again unless the store has them by now.
    pub fn stop(&self) {
        let Ok(mut slot) = self.running.lock() else {
            return;
        };
        if let Some(running) = slot.take() {
            running.timer.abort();
            running.transacted.cancel();
            running.owned.cancel();
            self.detector.set_state(DetectionPhase::Transacted, DetectionState::Idle);
            self.detector.set_state(DetectionPhase::Owned, DetectionState::Idle);
            // Batches in flight are lost with the output; the store decides what is known
            if let Ok(mut emitted) = self.detector.emitted.lock() {
                emitted.clear();
            }
            log::info!(
                "detection::autodetector: stopped for {} on chain {}",
                self.detector.wallet,
                self.detector.chain
            );
        }
    }

    /// Runs both phases once, in order, and returns the new tokens.
    pub async fn run_once(&self) -> Vec<Token> {
        let mut tokens = self.detector.detect_transacted().await;
        tokens.extend(self.detector.detect_owned().await);
        tokens
    }
}

impl Drop for TokenAutoDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn emit(output: &mpsc::Sender<Vec<Token>>, tokens: Vec<Token>) {
    if tokens.is_empty() {
        return;
    }
    if output.send(tokens).await.is_err() {
        log::debug!("detection::autodetector: output closed, dropping detected tokens");
    }
}

impl Detector {
    fn state(&self, phase: DetectionPhase) -> DetectionState {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(&phase).copied())
            .unwrap_or(DetectionState::Idle)
    }

    fn set_state(&self, phase: DetectionPhase, state: DetectionState) {
        if let Ok(mut states) = self.states.lock() {
            states.insert(phase, state);
        }
    }

    async fn detect_transacted(&self) -> Vec<Token> {
        let phase = DetectionPhase::Transacted;
        let Some(discoverer) = self.discoverer.as_ref().filter(|d| d.supports(self.chain)) else {
            return Vec::new();
        };
        self.set_state(phase, DetectionState::DiscoveringTransacted);

        let mut candidates = HashSet::new();
        let mut token_ids: HashMap<Address, HashSet<U256>> = HashMap::new();
        let mut watermarks = Vec::new();
        for kind in DiscoveryKind::ALL {
            let since = self
                .store
                .watermark(self.chain, kind)
                .map_or(0, |block| block + 1);
            match discoverer.discover(self.wallet, self.chain, kind, since).await {
                Ok(discovery) => {
                    let watermark = discovery.watermark();
                    candidates.extend(discovery.contracts);
                    for (contract, ids) in discovery.erc1155_token_ids {
                        token_ids.entry(contract).or_default().extend(ids);
                    }
                    if let Some(block) = watermark {
                        watermarks.push((kind, block));
                    }
                }
                Err(e) => log::warn!(
                    "detection::autodetector: {} discovery on chain {} failed: {e}",
                    kind.action(),
                    self.chain
                ),
            }
        }

        for (contract, ids) in self.store.deferred(self.chain) {
            let key = TokenKey::new(self.chain, contract);
            token_ids.entry(contract).or_default().extend(ids);
            if self.store.is_excluded(&key) {
                self.store.clear_deferred(&key);
            } else {
                candidates.insert(contract);
            }
        }
        for (contract, ids) in &token_ids {
            let key = TokenKey::new(self.chain, *contract);
            let added = self.store.merge_token_ids(key, ids.iter().copied());
            if added > 0 {
                log::debug!("detection::autodetector: {added} new token ids for {key}");
            }
        }

        self.set_state(phase, DetectionState::ClassifyingContracts);
        let tokens = self.classify(candidates, &token_ids).await;

        for (kind, block) in watermarks {
            self.store.set_watermark(self.chain, kind, block);
        }
        self.set_state(phase, DetectionState::Idle);
        tokens
    }

    async fn detect_owned(&self) -> Vec<Token> {
        let phase = DetectionPhase::Owned;
        self.set_state(phase, DetectionState::DiscoveringOwned);

        let unknown: Vec<Address> = self
            .popular
            .iter()
            .copied()
            .filter(|contract| self.is_candidate(*contract))
            .collect();
        let balances = join_all(unknown.iter().map(|contract| {
            call_contract(
                self.caller.as_ref(),
                self.chain,
                *contract,
                IERC20::balanceOfCall { owner: self.wallet },
            )
        }))
        .await;
        let owned: HashSet<Address> = unknown
            .into_iter()
            .zip(balances)
            .filter_map(|(contract, balance)| match balance {
                Ok(balance) if !balance._0.is_zero() => Some(contract),
                Ok(_) => None,
                Err(e) => {
                    log::debug!("detection::autodetector: balance check of {contract} failed: {e}");
                    None
                }
            })
            .collect();

        self.set_state(phase, DetectionState::ClassifyingContracts);
        let tokens = self.classify(owned, &HashMap::new()).await;
        self.set_state(phase, DetectionState::Idle);
        tokens
    }

    fn is_candidate(&self, contract: Address) -> bool {
        !contract.is_zero()
            && !self.store.is_excluded(&TokenKey::new(self.chain, contract))
            && !self.emitted.lock().is_ok_and(|set| set.contains(&contract))
            && !self.rejected.lock().is_ok_and(|set| set.contains(&contract))
    }

    /// Classifies candidates in parallel. Each contract is emitted at most once per run
    /// of the detector; contracts that match no token interface are not queried again.
    /// Contracts that could not be queried are deferred in the store and retried by
    /// the next transacted pass.
    async fn classify(
        &self,
        candidates: HashSet<Address>,
        token_ids: &HashMap<Address, HashSet<U256>>,
    ) -> Vec<Token> {
        let candidates: Vec<Address> = candidates
            .into_iter()
            .filter(|contract| self.is_candidate(*contract))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let results = join_all(
            candidates
                .iter()
                .map(|contract| self.classifier.classify(self.chain, *contract)),
        )
        .await;

        let mut tokens = Vec::new();
        for (contract, result) in candidates.into_iter().zip(results) {
            let key = TokenKey::new(self.chain, contract);
            let classified = match result {
                Ok(Some(classified)) => classified,
                Ok(None) => {
                    self.store.clear_deferred(&key);
                    if let Ok(mut rejected) = self.rejected.lock() {
                        rejected.insert(contract);
                    }
                    continue;
                }
                Err(e) => {
                    log::warn!("detection::autodetector: classifying {key} failed, will retry: {e}");
                    let ids = token_ids.get(&contract).into_iter().flatten().copied();
                    self.store.defer_detection(key, ids);
                    continue;
                }
            };
            self.store.clear_deferred(&key);
            let first_time = self
                .emitted
                .lock()
                .is_ok_and(|mut emitted| emitted.insert(contract));
            if !first_time {
                continue;
            }

            let mut token = classified.into_token(self.chain, TokenSource::Detected);
            if token.token_type == TokenType::Erc1155 {
                if let Some(ids) = token_ids.get(&contract) {
                    let mut ids: Vec<U256> = ids.iter().copied().collect();
                    ids.sort();
                    token.balance = TokenBalance::NonFungible(
                        ids.into_iter()
                            .map(|id| NonFungibleBalance::new(id, U256::ZERO))
                            .collect(),
                    );
                }
            }
            tokens.push(token);
        }

        log::info!(
            "detection::autodetector: {} new tokens for {} on chain {}",
            tokens.len(),
            self.wallet,
            self.chain
        );
        tokens
    }
}
