use alloy::primitives::{address, fixed_bytes, Address, FixedBytes};

/// Placeholder contract for the native currency and "no owner" results
pub const NULL_ADDRESS: Address = Address::ZERO;

// ENS registry, same address on every network ENS is deployed to
pub const ENS_REGISTRY: Address = address!("0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e");

// EIP-165 interface ids
pub const ERC721_INTERFACE_ID: FixedBytes<4> = fixed_bytes!("0x80ac58cd");
pub const ERC721_FOR_TICKETS_INTERFACE_ID: FixedBytes<4> = fixed_bytes!("0x4f452b9a");
pub const ERC1155_INTERFACE_ID: FixedBytes<4> = fixed_bytes!("0xd9b67a26");
// Pre-standard ERC721 (CryptoKitties era)
pub const LEGACY_ERC721_INTERFACE_ID: FixedBytes<4> = fixed_bytes!("0x9a20483d");

// Name resolution endpoints
pub const UNSTOPPABLE_V2_API: &str = "https://resolve.unstoppabledomains.com";
pub const UNSTOPPABLE_V1_API: &str = "https://unstoppabledomains.com";
pub const DAS_INDEXER_API: &str = "https://indexer-v1.did.id";

/// Domain records older than this are re-fetched (one week)
pub const DEFAULT_DOMAIN_TTL_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_AUTODETECT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_BALANCE_REFRESH_SECS: u64 = 30;
pub const DEFAULT_BLOCK_POLL_SECS: u64 = 12;
pub const DEFAULT_EXPLORER_PAGE_SIZE: u32 = 1000;
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// Upper bound on `tokenOfOwnerByIndex` calls per ERC721 contract per refresh
pub const MAX_ENUMERATED_NFTS: usize = 50;

/// Well-known tokens checked by the owned-balance detection phase.
pub fn popular_tokens(chain: u64) -> Vec<Address> {
    match chain {
        1 => vec![
            // USDC, USDT, DAI, WETH, LINK
            address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            address!("0xdAC17F958D2ee523a2206206994597C13D831ec7"),
            address!("0x6B175474E89094C44Da98b954EedeAC495271d0F"),
            address!("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            address!("0x514910771AF9Ca656af840dff83E8264EcF986CA"),
        ],
        10 => vec![
            address!("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
            address!("0x4200000000000000000000000000000000000042"),
        ],
        137 => vec![
            address!("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
            address!("0xc2132D05D31c914a87C6611C10748AEb04B58e8F"),
        ],
        8453 => vec![
            address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
            address!("0x4200000000000000000000000000000000000006"),
        ],
        42161 => vec![
            address!("0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
            address!("0x912CE59144191C1204E64559FE8253a0e49E6548"),
        ],
        _ => Vec::new(),
    }
}
