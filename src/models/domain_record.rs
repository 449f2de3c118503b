use alloy::primitives::Address;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::chain::Chain;

/// Result of a resolution: an address for forward lookups, a name for reverse ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ResolvedValue {
    Address(Address),
    Name(String),
}

impl ResolvedValue {
    pub const fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(address) => Some(*address),
            Self::Name(_) => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Address(_) => None,
        }
    }
}

/// Cache identity: the query (name or address string) on a chain. Queries are
/// lowercased on construction so `Vitalik.ETH` and `vitalik.eth` share a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainKey {
    pub query: String,
    pub chain: Chain,
}

impl DomainKey {
    pub fn new(query: &str, chain: Chain) -> Self {
        Self {
            query: query.trim().to_lowercase(),
            chain,
        }
    }

    pub fn for_address(address: &Address, chain: Chain) -> Self {
        Self::new(&address.to_string(), chain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub key: DomainKey,
    pub value: ResolvedValue,
    pub fetched_at: DateTime<Utc>,
}

impl DomainRecord {
    pub fn new(key: DomainKey, value: ResolvedValue) -> Self {
        Self::fetched_at(key, value, Utc::now())
    }

    pub const fn fetched_at(key: DomainKey, value: ResolvedValue, fetched_at: DateTime<Utc>) -> Self {
        Self {
            key,
            value,
            fetched_at,
        }
    }

    /// A record is stale once strictly more than `expiration` has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>, expiration: Duration) -> bool {
        now - self.fetched_at > expiration
    }
}
