//! The per-wallet token store.
//!
//! Single source of truth for tokens, soft states (hidden, deleted, delegate) and
//! discovery watermarks. Every write that changes a chain's token list publishes a new
//! snapshot on that chain's watch channel while the store lock is held, so observers
//! can never see an older snapshot after a newer one.

use alloy::primitives::{Address, U256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::discovery::DiscoveryKind;
use crate::error::TokenError;
use crate::models::chain::Chain;
use crate::models::token::{
    sanitize_string, NonFungibleBalance, Token, TokenBalance, TokenKey, TokenType,
    TokenUpdateAction,
};

pub type TokenSnapshot = Arc<Vec<Token>>;

#[derive(Default)]
struct Inner {
    tokens: BTreeMap<TokenKey, Token>,
    hidden: HashSet<TokenKey>,
    deleted: HashSet<TokenKey>,
    delegate: HashSet<TokenKey>,
    watermarks: HashMap<(Chain, DiscoveryKind), u64>,
    // Contracts whose classification failed on transport, with ERC1155 ids seen so far
    deferred: HashMap<TokenKey, HashSet<U256>>,
    channels: HashMap<Chain, watch::Sender<TokenSnapshot>>,
}

impl Inner {
    fn snapshot(&self, chain: Chain) -> Vec<Token> {
        self.tokens
            .range(TokenKey::new(chain, Address::ZERO)..=TokenKey::new(chain, Address::repeat_byte(0xff)))
            .map(|(key, token)| {
                let mut token = token.clone();
                token.hidden = self.hidden.contains(key);
                token.delegate = self.delegate.contains(key);
                token.deleted = false;
                token
            })
            .collect()
    }

    fn notify(&mut self, chain: Chain) {
        let snapshot = Arc::new(self.snapshot(chain));
        self.channels
            .entry(chain)
            .or_insert_with(|| watch::channel(Arc::new(Vec::new())).0)
            .send_replace(snapshot);
    }

    fn apply(&mut self, key: TokenKey, action: TokenUpdateAction) -> bool {
        if let TokenUpdateAction::SetHidden(hidden) = action {
            return if hidden {
                self.hidden.insert(key)
            } else {
                self.hidden.remove(&key)
            };
        }

        let Some(token) = self.tokens.get_mut(&key) else {
            return false;
        };
        match action {
            TokenUpdateAction::SetFungibleValue(value) => {
                replace(&mut token.balance, TokenBalance::Fungible(value))
            }
            TokenUpdateAction::SetNonFungibleBalance(entries) => {
                replace(&mut token.balance, TokenBalance::NonFungible(entries))
            }
            TokenUpdateAction::SetName(name) => replace(&mut token.name, sanitize_string(&name)),
            TokenUpdateAction::SetSymbol(symbol) => {
                replace(&mut token.symbol, sanitize_string(&symbol))
            }
            TokenUpdateAction::SetDecimals(decimals) => replace(&mut token.decimals, decimals),
            TokenUpdateAction::SetType(token_type) => {
                let changed = replace(&mut token.token_type, token_type);
                let fungible_balance = matches!(token.balance, TokenBalance::Fungible(_));
                if changed && token_type.is_fungible() != fungible_balance {
                    token.balance = TokenBalance::empty_for(token_type);
                }
                changed
            }
            TokenUpdateAction::SetHidden(_) => false,
        }
    }
}

/// Assigns `value` to `slot`, returning whether it changed.
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

pub struct TokenStore {
    wallet: Address,
    inner: Mutex<Inner>,
}

impl TokenStore {
    pub fn new(wallet: Address) -> Self {
        Self {
            wallet,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub const fn wallet(&self) -> Address {
        self.wallet
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind, still usable
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Ensures the native currency entry for `chain` exists.
    pub fn bootstrap_native(&self, chain: Chain) {
        let mut inner = self.lock();
        let key = TokenKey::native(chain);
        if !inner.tokens.contains_key(&key) {
            inner.tokens.insert(key, Token::native(chain));
        }
        inner.notify(chain);
    }

    /// Inserts newly detected tokens. Tokens already present, deleted by the user or
    /// flagged as delegate contracts are ignored. Returns the tokens actually inserted.
    pub fn mark_detected(&self, tokens: Vec<Token>) -> Vec<Token> {
        let mut inner = self.lock();
        let mut inserted = Vec::new();
        for token in tokens {
            let key = token.key;
            if inner.tokens.contains_key(&key)
                || inner.deleted.contains(&key)
                || inner.delegate.contains(&key)
            {
                continue;
            }
            inner.tokens.insert(key, token.clone());
            inserted.push(token);
        }

        let chains: HashSet<Chain> = inserted.iter().map(Token::chain).collect();
        for chain in chains {
            inner.notify(chain);
        }
        inserted
    }

    /// Adds (or re-adds) a token the user asked for explicitly. Clears deleted and
    /// hidden states; an existing entry keeps its balance.
    pub fn add_custom(&self, token: Token) -> Token {
        let mut inner = self.lock();
        let key = token.key;
        inner.deleted.remove(&key);
        inner.hidden.remove(&key);
        inner.delegate.remove(&key);

        let stored = match inner.tokens.remove(&key) {
            Some(existing) if existing.token_type == token.token_type => Token {
                balance: existing.balance,
                ..token
            },
            _ => token,
        };
        inner.tokens.insert(key, stored.clone());
        inner.notify(key.chain);
        stored
    }

    /// Applies `action` to the token at `key`. Observers are only notified on change.
    pub fn update(&self, key: TokenKey, action: TokenUpdateAction) -> bool {
        let mut inner = self.lock();
        let changed = inner.apply(key, action);
        if changed {
            inner.notify(key.chain);
        }
        changed
    }

    /// Applies a batch of updates with a single notification per affected chain.
    pub fn update_many(&self, updates: impl IntoIterator<Item = (TokenKey, TokenUpdateAction)>) -> usize {
        let mut inner = self.lock();
        let mut changed = HashSet::new();
        for (key, action) in updates {
            if inner.apply(key, action) {
                changed.insert(key);
            }
        }
        let chains: HashSet<Chain> = changed.iter().map(|key| key.chain).collect();
        for chain in chains {
            inner.notify(chain);
        }
        changed.len()
    }

    /// # Errors
    /// * [`TokenError::UnknownToken`] if `key` is not in the store
    pub fn mark(&self, key: TokenKey, hidden: bool) -> Result<(), TokenError> {
        let mut inner = self.lock();
        if !inner.tokens.contains_key(&key) {
            return Err(TokenError::UnknownToken(key));
        }
        if inner.apply(key, TokenUpdateAction::SetHidden(hidden)) {
            inner.notify(key.chain);
        }
        Ok(())
    }

    /// Removes a token and remembers the deletion so detection never brings it back.
    pub fn delete(&self, key: TokenKey) -> bool {
        let mut inner = self.lock();
        inner.deleted.insert(key);
        let removed = inner.tokens.remove(&key).is_some();
        if removed {
            inner.notify(key.chain);
        }
        removed
    }

    /// Flags `key` as a delegate (non-token) contract, or clears the flag.
    pub fn set_delegate(&self, key: TokenKey, delegate: bool) {
        let mut inner = self.lock();
        let changed = if delegate {
            inner.delegate.insert(key)
        } else {
            inner.delegate.remove(&key)
        };
        if changed && inner.tokens.contains_key(&key) {
            inner.notify(key.chain);
        }
    }

    /// Whether detection must skip `key`: already enabled, hidden, deleted or delegate.
    pub fn is_excluded(&self, key: &TokenKey) -> bool {
        let inner = self.lock();
        inner.tokens.contains_key(key)
            || inner.hidden.contains(key)
            || inner.deleted.contains(key)
            || inner.delegate.contains(key)
    }

    pub fn token(&self, key: &TokenKey) -> Option<Token> {
        let inner = self.lock();
        inner.tokens.get(key).map(|token| {
            let mut token = token.clone();
            token.hidden = inner.hidden.contains(key);
            token.delegate = inner.delegate.contains(key);
            token
        })
    }

    /// Every stored token of `chain`, hidden ones included.
    pub fn tokens(&self, chain: Chain) -> Vec<Token> {
        self.lock().snapshot(chain)
    }

    /// Tokens of `chain` that are not hidden.
    pub fn enabled_tokens(&self, chain: Chain) -> Vec<Token> {
        self.tokens(chain)
            .into_iter()
            .filter(|token| !token.hidden)
            .collect()
    }

    pub fn watermark(&self, chain: Chain, kind: DiscoveryKind) -> Option<u64> {
        self.lock().watermarks.get(&(chain, kind)).copied()
    }

    /// Raises the discovery watermark; lower values are ignored.
    pub fn set_watermark(&self, chain: Chain, kind: DiscoveryKind, block: u64) {
        let mut inner = self.lock();
        let watermark = inner.watermarks.entry((chain, kind)).or_insert(block);
        *watermark = (*watermark).max(block);
    }

    /// Adds ERC1155 token ids the stored token does not track yet, each at value 0
    /// until the next balance fetch. Returns how many ids were added.
    pub fn merge_token_ids(&self, key: TokenKey, ids: impl IntoIterator<Item = U256>) -> usize {
        let mut inner = self.lock();
        let Some(token) = inner.tokens.get_mut(&key) else {
            return 0;
        };
        if token.token_type != TokenType::Erc1155 {
            return 0;
        }
        let TokenBalance::NonFungible(entries) = &mut token.balance else {
            return 0;
        };

        let known: HashSet<U256> = entries.iter().map(|entry| entry.token_id).collect();
        let before = entries.len();
        entries.extend(
            ids.into_iter()
                .collect::<HashSet<_>>()
                .difference(&known)
                .map(|id| NonFungibleBalance::new(*id, U256::ZERO)),
        );
        let added = entries.len() - before;
        if added > 0 {
            entries.sort_by_key(|entry| entry.token_id);
            inner.notify(key.chain);
        }
        added
    }

    /// Remembers a contract detection could not classify, so a later pass retries it.
    pub fn defer_detection(&self, key: TokenKey, token_ids: impl IntoIterator<Item = U256>) {
        self.lock().deferred.entry(key).or_default().extend(token_ids);
    }

    /// Contracts of `chain` awaiting classification, with their known ERC1155 ids.
    pub fn deferred(&self, chain: Chain) -> HashMap<Address, HashSet<U256>> {
        self.lock()
            .deferred
            .iter()
            .filter(|(key, _)| key.chain == chain)
            .map(|(key, ids)| (key.contract, ids.clone()))
            .collect()
    }

    pub fn clear_deferred(&self, key: &TokenKey) {
        self.lock().deferred.remove(key);
    }

    /// Republishes the current snapshot of `chain`.
    pub fn notify(&self, chain: Chain) {
        self.lock().notify(chain);
    }

    /// Change stream of `chain`, starting with the current snapshot.
    pub fn observe(&self, chain: Chain) -> watch::Receiver<TokenSnapshot> {
        let mut inner = self.lock();
        if !inner.channels.contains_key(&chain) {
            let snapshot = Arc::new(inner.snapshot(chain));
            inner.channels.insert(chain, watch::channel(snapshot).0);
        }
        inner.channels[&chain].subscribe()
    }
}
