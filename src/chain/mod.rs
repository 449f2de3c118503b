//! Chain call capability.
//!
//! Everything above this module talks to chains through [`ChainCaller`], an abstract
//! read-only "smart contract call" plus the two RPCs the engine needs besides
//! `eth_call`. [`RpcChainCaller`] backs it with one alloy HTTP provider per chain.

pub mod state;

use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::collections::HashMap;
use url::Url;

use crate::error::ChainCallError;
use crate::models::chain::Chain;

pub use state::ChainState;

#[async_trait]
pub trait ChainCaller: Send + Sync {
    /// Executes a read-only call of `data` against `to` at the latest block.
    async fn call(&self, chain: Chain, to: Address, data: Bytes) -> Result<Bytes, ChainCallError>;

    async fn native_balance(&self, chain: Chain, owner: Address) -> Result<U256, ChainCallError>;

    async fn block_number(&self, chain: Chain) -> Result<u64, ChainCallError>;
}

/// Encodes `call`, executes it and decodes the return value.
///
/// Empty return data is reported as [`ChainCallError::Reverted`]: calling a function an
/// EOA or a contract without that selector yields `0x`, not a revert.
///
/// # Errors
/// * Transport failures from the underlying caller
/// * [`ChainCallError::Decode`] when the return data does not match `C`'s return types
pub async fn call_contract<C: SolCall + Send>(
    caller: &dyn ChainCaller,
    chain: Chain,
    to: Address,
    call: C,
) -> Result<C::Return, ChainCallError> {
    let data = caller.call(chain, to, Bytes::from(call.abi_encode())).await?;
    if data.is_empty() {
        return Err(ChainCallError::Reverted(format!(
            "empty return data from {to}"
        )));
    }
    C::abi_decode_returns(&data, true).map_err(|e| ChainCallError::Decode(e.to_string()))
}

/// [`ChainCaller`] over alloy HTTP providers, one per configured chain.
pub struct RpcChainCaller {
    providers: HashMap<Chain, RootProvider>,
}

impl RpcChainCaller {
    pub fn new(endpoints: &HashMap<Chain, Url>) -> Self {
        let providers = endpoints
            .iter()
            .map(|(chain, url)| {
                log::debug!("chain: provider for chain {chain} at {url}");
                (*chain, RootProvider::new_http(url.clone()))
            })
            .collect();
        Self { providers }
    }

    fn provider(&self, chain: Chain) -> Result<&RootProvider, ChainCallError> {
        self.providers
            .get(&chain)
            .ok_or(ChainCallError::UnknownChain(chain))
    }
}

#[async_trait]
impl ChainCaller for RpcChainCaller {
    async fn call(&self, chain: Chain, to: Address, data: Bytes) -> Result<Bytes, ChainCallError> {
        let provider = self.provider(chain)?;
        let tx = TransactionRequest::default().with_to(to).with_input(data);

        provider
            .raw_request::<_, Bytes>("eth_call".into(), (tx, BlockNumberOrTag::Latest))
            .await
            .map_err(|e| {
                if e.is_error_resp() {
                    ChainCallError::Reverted(e.to_string())
                } else {
                    ChainCallError::Transport(e.to_string())
                }
            })
    }

    async fn native_balance(&self, chain: Chain, owner: Address) -> Result<U256, ChainCallError> {
        self.provider(chain)?
            .get_balance(owner)
            .await
            .map_err(|e| ChainCallError::Transport(e.to_string()))
    }

    async fn block_number(&self, chain: Chain) -> Result<u64, ChainCallError> {
        self.provider(chain)?
            .get_block_number()
            .await
            .map_err(|e| ChainCallError::Transport(e.to_string()))
    }
}
