use alloy::primitives::Address;
use thiserror::Error;

use crate::models::chain::Chain;
use crate::models::token::TokenKey;

/// Failure of a read-only smart contract call or other chain RPC.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainCallError {
    #[error("no RPC endpoint configured for chain {0}")]
    UnknownChain(Chain),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("call reverted or returned no data: {0}")]
    Reverted(String),

    #[error("failed to decode return data: {0}")]
    Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("invalid url: {0}")]
    Url(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

/// Errors raised by name resolution providers and the orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// Query does not match the provider's grammar; no lookup was attempted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The lookup ran but no address is registered for the name.
    #[error("no address found for {0}")]
    AddressNotFound(String),

    #[error("no name found for {0}")]
    NameNotFound(Address),

    #[error("chain call failed: {0}")]
    ChainCall(#[from] ChainCallError),

    #[error("network error: {0}")]
    Network(#[from] HttpError),

    /// The reverse record names a domain whose forward record points elsewhere.
    #[error("reverse record of {address} claims {name}, which resolves to {resolved}")]
    ReverseResolutionMismatch {
        address: Address,
        name: String,
        resolved: Address,
    },

    #[error("could not resolve {query}: {source}")]
    ResolutionFailed {
        query: String,
        #[source]
        source: Box<ResolutionError>,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("no transaction history API for chain {0}")]
    UnsupportedChain(Chain),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("transaction history API error: {0}")]
    Api(String),
}

/// User-facing token errors. Only the explicit add/import paths surface these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("{contract} on chain {chain} does not implement a known token interface")]
    NotATokenContract { contract: Address, chain: Chain },

    #[error("chain {0} is not active")]
    ChainNotActive(Chain),

    #[error("unknown token {0}")]
    UnknownToken(TokenKey),

    #[error("could not classify contract: {0}")]
    ChainCall(#[from] ChainCallError),
}
