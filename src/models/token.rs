use alloy::primitives::{Address, U256};
use core::fmt;
use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::chain::Chain;
use crate::utils::constants::NULL_ADDRESS;

/// Identity of a token inside a wallet's store: the contract on a chain.
/// The native currency uses [`NULL_ADDRESS`] as its contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenKey {
    pub chain: Chain,
    pub contract: Address,
}

impl TokenKey {
    pub const fn new(chain: Chain, contract: Address) -> Self {
        Self { chain, contract }
    }

    pub const fn native(chain: Chain) -> Self {
        Self::new(chain, NULL_ADDRESS)
    }

    pub fn is_native(&self) -> bool {
        self.contract == NULL_ADDRESS
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.contract, self.chain)
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    #[display("native")]
    Native,
    #[display("erc20")]
    Erc20,
    #[display("erc721")]
    Erc721,
    #[display("erc721ForTickets")]
    Erc721ForTickets,
    #[display("erc875")]
    Erc875,
    #[display("erc1155")]
    Erc1155,
}

impl TokenType {
    pub const fn is_fungible(self) -> bool {
        matches!(self, Self::Native | Self::Erc20)
    }
}

/// How a token entered the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenSource {
    Native,
    Detected,
    Custom,
}

/// One entry of a non-fungible balance.
///
/// ERC721: `value` is always 1. ERC1155: `value` is the amount held of `token_id`.
/// ERC875 / ERC721-for-tickets: `token_id` is the raw ticket encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonFungibleBalance {
    pub token_id: U256,
    pub value: U256,
}

impl NonFungibleBalance {
    pub const fn new(token_id: U256, value: U256) -> Self {
        Self { token_id, value }
    }

    pub const fn owned(token_id: U256) -> Self {
        Self::new(token_id, U256::from_limbs([1, 0, 0, 0]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenBalance {
    Fungible(U256),
    NonFungible(Vec<NonFungibleBalance>),
}

impl TokenBalance {
    pub fn empty_for(token_type: TokenType) -> Self {
        if token_type.is_fungible() {
            Self::Fungible(U256::ZERO)
        } else {
            Self::NonFungible(Vec::new())
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Self::Fungible(value) => value.is_zero(),
            Self::NonFungible(entries) => entries.iter().all(|entry| entry.value.is_zero()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub key: TokenKey,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub token_type: TokenType,
    pub balance: TokenBalance,
    pub source: TokenSource,
    /// Soft states. The store's exclusion sets are authoritative; these are stamped on
    /// every token the store hands out.
    pub hidden: bool,
    pub deleted: bool,
    pub delegate: bool,
}

impl Token {
    /// Creates a token, sanitizing `name` and `symbol`.
    pub fn new(
        key: TokenKey,
        name: &str,
        symbol: &str,
        decimals: u8,
        token_type: TokenType,
        source: TokenSource,
    ) -> Self {
        Self {
            key,
            name: sanitize_string(name),
            symbol: sanitize_string(symbol),
            decimals,
            token_type,
            balance: TokenBalance::empty_for(token_type),
            source,
            hidden: false,
            deleted: false,
            delegate: false,
        }
    }

    /// The native currency entry for `chain`, named from the chain catalogue.
    pub fn native(chain: Chain) -> Self {
        let (name, symbol, decimals) = chain.info().map_or(("Ether", "ETH", 18), |info| {
            (info.native_name, info.native_symbol, info.native_decimals)
        });
        Self::new(
            TokenKey::native(chain),
            name,
            symbol,
            decimals,
            TokenType::Native,
            TokenSource::Native,
        )
    }

    pub const fn chain(&self) -> Chain {
        self.key.chain
    }

    pub const fn contract(&self) -> Address {
        self.key.contract
    }

    /// Token ids currently known for a non-fungible token
    pub fn token_ids(&self) -> Vec<U256> {
        match &self.balance {
            TokenBalance::NonFungible(entries) => entries.iter().map(|e| e.token_id).collect(),
            TokenBalance::Fungible(_) => Vec::new(),
        }
    }
}

/// A typed mutation of a stored token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenUpdateAction {
    SetFungibleValue(U256),
    SetNonFungibleBalance(Vec<NonFungibleBalance>),
    SetName(String),
    SetSymbol(String),
    SetDecimals(u8),
    SetType(TokenType),
    SetHidden(bool),
}

/// A balance refresh result for one token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub key: TokenKey,
    pub action: TokenUpdateAction,
}

/// Which tokens a balance refresh covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceRefreshPolicy {
    Token(TokenKey),
    Tokens(Vec<TokenKey>),
    All,
    NativeOnly,
}

/// Sanitizes a given string by:
/// 1. Converting any invalid UTF-8 sequences to the replacement character `�`.
/// 2. Removing any null byte characters (`\0`).
/// 3. Trimming surrounding whitespace.
///
/// On-chain `name()`/`symbol()` values are arbitrary bytes and frequently padded.
pub fn sanitize_string(value: &str) -> String {
    let sanitized = String::from_utf8_lossy(value.as_bytes()).to_string();
    sanitized.replace('\0', "").trim().to_string()
}
