pub mod chain;
pub mod domain_record;
pub mod token;

pub use chain::{Chain, ChainInfo};
pub use domain_record::{DomainKey, DomainRecord, ResolvedValue};
pub use token::{
    BalanceRefreshPolicy, BalanceUpdate, NonFungibleBalance, Token, TokenBalance, TokenKey,
    TokenSource, TokenType, TokenUpdateAction,
};
