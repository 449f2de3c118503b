//! Name resolution: ENS, Unstoppable Domains (v1 and v2) and DAS, with per-provider
//! caches and an orchestrator that applies the fallback order.

pub mod avatar;
pub mod cache;
pub mod das;
pub mod ens;
pub mod orchestrator;
pub mod unstoppable;

use alloy::primitives::Address;
use async_trait::async_trait;

use crate::error::ResolutionError;

pub use avatar::{AvatarGenerator, AvatarImage, BlockieAvatars, EnsAvatars};
pub use cache::{DiskRecordStore, MemoryRecordStore, RecordStore, ResolutionCache};
pub use das::DasResolver;
pub use ens::EnsResolver;
pub use orchestrator::DomainResolutionOrchestrator;
pub use unstoppable::{UnstoppableV1, UnstoppableV2};

pub trait ResolutionProvider: Send + Sync {
    /// Short provider name used in logs
    fn provider(&self) -> &'static str;
}

/// Forward resolution: name to address.
#[async_trait]
pub trait AddressResolver: ResolutionProvider {
    /// Pure cache read, never touches the network.
    fn cached_address(&self, name: &str) -> Option<Address>;

    /// # Errors
    /// * [`ResolutionError::InvalidInput`] before any lookup if `name` is not in this
    ///   provider's grammar
    /// * [`ResolutionError::AddressNotFound`] when the lookup returns nothing
    /// * Transport errors from the chain or HTTP capability
    async fn resolve_address(&self, name: &str) -> Result<Address, ResolutionError>;
}

/// Reverse resolution: address to name, verified by forward resolution.
#[async_trait]
pub trait NameResolver: ResolutionProvider {
    fn cached_name(&self, address: Address) -> Option<String>;

    /// # Errors
    /// * [`ResolutionError::NameNotFound`] when no reverse record exists
    /// * [`ResolutionError::ReverseResolutionMismatch`] when the claimed name does not
    ///   resolve back to `address`
    async fn resolve_name(&self, address: Address) -> Result<String, ResolutionError>;
}

/// Lowercases and trims a name, rejecting anything that is not `label(.label)+`.
pub(crate) fn normalize_domain(name: &str) -> Result<String, ResolutionError> {
    let normalized = name.trim().to_lowercase();
    let valid = normalized.contains('.')
        && normalized.split('.').all(|label| !label.is_empty())
        && !normalized.chars().any(char::is_whitespace);
    if valid {
        Ok(normalized)
    } else {
        Err(ResolutionError::InvalidInput(name.to_string()))
    }
}

/// Reverse check shared by every reverse-capable provider.
pub(crate) async fn verify_reverse<R>(
    resolver: &R,
    address: Address,
    name: String,
) -> Result<String, ResolutionError>
where
    R: AddressResolver + ?Sized,
{
    match resolver.resolve_address(&name).await {
        Ok(resolved) if resolved == address => Ok(name),
        Ok(resolved) => Err(ResolutionError::ReverseResolutionMismatch {
            address,
            name,
            resolved,
        }),
        Err(ResolutionError::AddressNotFound(_) | ResolutionError::InvalidInput(_)) => {
            Err(ResolutionError::ReverseResolutionMismatch {
                address,
                name,
                resolved: Address::ZERO,
            })
        }
        Err(e) => Err(e),
    }
}
