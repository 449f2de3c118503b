use alloy::primitives::Address;
use std::sync::Arc;
use std::time::Duration;

use crate::chain::{ChainCaller, ChainState};
use crate::models::chain::Chain;

/// One active (wallet, chain) pair and its chain state.
#[derive(Clone)]
pub struct WalletSession {
    pub wallet: Address,
    pub chain: Chain,
    pub chain_state: Arc<ChainState>,
}

impl WalletSession {
    pub fn new(
        wallet: Address,
        chain: Chain,
        caller: Arc<dyn ChainCaller>,
        block_poll_interval: Duration,
    ) -> Self {
        Self {
            wallet,
            chain,
            chain_state: Arc::new(ChainState::new(chain, caller, block_poll_interval)),
        }
    }

    /// Sessions for every chain in `chains`, for one wallet.
    pub fn for_chains(
        wallet: Address,
        chains: &[Chain],
        caller: &Arc<dyn ChainCaller>,
        block_poll_interval: Duration,
    ) -> Vec<Self> {
        chains
            .iter()
            .map(|chain| Self::new(wallet, *chain, caller.clone(), block_poll_interval))
            .collect()
    }
}

impl std::fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSession")
            .field("wallet", &self.wallet)
            .field("chain", &self.chain)
            .field("latest_block", &self.chain_state.latest_block())
            .finish()
    }
}
