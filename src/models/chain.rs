//! Chain identifiers and the catalogue of chains this engine knows how to talk to.
//!
//! A [`Chain`] is only an EVM chain id; it is the partition key for tokens, domain
//! records and sessions. Static facts about well-known chains (native currency,
//! default RPC, block explorer API) live in [`ChainInfo`].

use alloy::primitives::{address, Address};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[display("{_0}")]
pub struct Chain(pub u64);

impl Chain {
    pub const MAINNET: Self = Self(1);
    pub const OPTIMISM: Self = Self(10);
    pub const BSC: Self = Self(56);
    pub const GNOSIS: Self = Self(100);
    pub const POLYGON: Self = Self(137);
    pub const BASE: Self = Self(8453);
    pub const ARBITRUM: Self = Self(42161);
    pub const CELO: Self = Self(42220);

    pub const fn id(self) -> u64 {
        self.0
    }

    /// Static info for known chains, `None` for anything else.
    pub fn info(self) -> Option<&'static ChainInfo> {
        CHAINS.iter().find(|info| info.chain == self)
    }

    pub fn name(self) -> String {
        self.info()
            .map_or_else(|| format!("chain-{}", self.0), |info| info.name.to_string())
    }
}

impl From<u64> for Chain {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for Chain {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

/// Static description of a known chain
#[derive(Debug, Clone)]
pub struct ChainInfo {
    pub chain: Chain,
    pub name: &'static str,
    pub native_name: &'static str,
    pub native_symbol: &'static str,
    pub native_decimals: u8,
    pub default_rpc: &'static str,
    /// Etherscan-compatible `.../api` endpoint
    pub explorer_api: Option<&'static str>,
    /// ERC20 contract that mirrors the native currency on this chain, if any
    pub native_erc20: Option<Address>,
}

pub static CHAINS: &[ChainInfo] = &[
    ChainInfo {
        chain: Chain::MAINNET,
        name: "Ethereum",
        native_name: "Ether",
        native_symbol: "ETH",
        native_decimals: 18,
        default_rpc: "https://eth.llamarpc.com",
        explorer_api: Some("https://api.etherscan.io/api"),
        native_erc20: None,
    },
    ChainInfo {
        chain: Chain::OPTIMISM,
        name: "Optimism",
        native_name: "Ether",
        native_symbol: "ETH",
        native_decimals: 18,
        default_rpc: "https://mainnet.optimism.io",
        explorer_api: Some("https://api-optimistic.etherscan.io/api"),
        native_erc20: Some(address!("0xDeadDeAddeAddEAddeadDEaDDEAdDeaDDeAD0000")),
    },
    ChainInfo {
        chain: Chain::BSC,
        name: "BNB Smart Chain",
        native_name: "BNB",
        native_symbol: "BNB",
        native_decimals: 18,
        default_rpc: "https://bsc-dataseed.binance.org",
        explorer_api: Some("https://api.bscscan.com/api"),
        native_erc20: None,
    },
    ChainInfo {
        chain: Chain::GNOSIS,
        name: "Gnosis",
        native_name: "xDai",
        native_symbol: "xDAI",
        native_decimals: 18,
        default_rpc: "https://rpc.gnosischain.com",
        explorer_api: Some("https://api.gnosisscan.io/api"),
        native_erc20: None,
    },
    ChainInfo {
        chain: Chain::POLYGON,
        name: "Polygon",
        native_name: "POL",
        native_symbol: "POL",
        native_decimals: 18,
        default_rpc: "https://polygon-rpc.com",
        explorer_api: Some("https://api.polygonscan.com/api"),
        native_erc20: Some(address!("0x0000000000000000000000000000000000001010")),
    },
    ChainInfo {
        chain: Chain::BASE,
        name: "Base",
        native_name: "Ether",
        native_symbol: "ETH",
        native_decimals: 18,
        default_rpc: "https://mainnet.base.org",
        explorer_api: Some("https://api.basescan.org/api"),
        native_erc20: None,
    },
    ChainInfo {
        chain: Chain::ARBITRUM,
        name: "Arbitrum One",
        native_name: "Ether",
        native_symbol: "ETH",
        native_decimals: 18,
        default_rpc: "https://arb1.arbitrum.io/rpc",
        explorer_api: Some("https://api.arbiscan.io/api"),
        native_erc20: None,
    },
    ChainInfo {
        chain: Chain::CELO,
        name: "Celo",
        native_name: "Celo",
        native_symbol: "CELO",
        native_decimals: 18,
        default_rpc: "https://forno.celo.org",
        explorer_api: Some("https://api.celoscan.io/api"),
        native_erc20: Some(address!("0x471EcE3750Da237f93B8E339c536989b8978a438")),
    },
];
