//! Balance fetching per token standard.
//!
//! One query per token, except ERC20s which go through a single Multicall3
//! `aggregate3` when there is more than one of them, and ERC1155s which query all
//! known token ids in one `balanceOfBatch`. A failure only ever costs the token it
//! belongs to: it is logged and produces no update.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use futures::future::join_all;
use std::sync::Arc;

use crate::chain::{call_contract, ChainCaller};
use crate::models::chain::Chain;
use crate::models::token::{
    BalanceUpdate, NonFungibleBalance, Token, TokenKey, TokenType, TokenUpdateAction,
};
use crate::utils::constants::MAX_ENUMERATED_NFTS;

pub(crate) mod abi {
    alloy::sol! {
        interface IMulticall3 {
            struct Call3 {
                address target;
                bool allowFailure;
                bytes callData;
            }

            struct Result {
                bool success;
                bytes returnData;
            }

            function aggregate3(Call3[] calldata calls) external payable returns (Result[] memory returnData);
        }

        interface IERC20 {
            function balanceOf(address owner) external view returns (uint256);
        }

        interface IERC721 {
            function balanceOf(address owner) external view returns (uint256);
            function tokenOfOwnerByIndex(address owner, uint256 index) external view returns (uint256);
        }

        interface IERC875 {
            function balanceOf(address owner) external view returns (uint256[]);
        }

        interface IERC721ForTickets {
            function getBalances(address owner) external view returns (uint256[]);
        }

        interface IERC1155 {
            function balanceOfBatch(address[] accounts, uint256[] ids) external view returns (uint256[]);
        }
    }
}

use abi::{IMulticall3, IERC1155, IERC20, IERC721, IERC721ForTickets, IERC875};

pub struct TokenBalanceFetcher {
    caller: Arc<dyn ChainCaller>,
    wallet: Address,
    chain: Chain,
    multicall: Option<Address>,
}

impl TokenBalanceFetcher {
    pub fn new(
        caller: Arc<dyn ChainCaller>,
        wallet: Address,
        chain: Chain,
        multicall: Option<Address>,
    ) -> Self {
        Self {
            caller,
            wallet,
            chain,
            multicall,
        }
    }

    /// Fetches balances of `tokens` and returns one update per token that succeeded.
    pub async fn refresh_balance(&self, tokens: &[Token]) -> Vec<BalanceUpdate> {
        let (erc20s, others): (Vec<&Token>, Vec<&Token>) = tokens
            .iter()
            .filter(|token| token.chain() == self.chain)
            .partition(|token| token.token_type == TokenType::Erc20);

        let batched = self.erc20_balances(&erc20s);
        let individual = join_all(others.iter().map(|token| self.balance_of(token)));
        let (mut updates, individual) = futures::join!(batched, individual);
        updates.extend(individual.into_iter().flatten());

        log::debug!(
            "balances: {}/{} balances refreshed for {} on chain {}",
            updates.len(),
            tokens.len(),
            self.wallet,
            self.chain
        );
        updates
    }

    async fn balance_of(&self, token: &Token) -> Option<BalanceUpdate> {
        let key = token.key;
        let action = match token.token_type {
            TokenType::Native => self
                .caller
                .native_balance(self.chain, self.wallet)
                .await
                .map(TokenUpdateAction::SetFungibleValue)
                .map_err(|e| e.to_string()),
            TokenType::Erc20 => self
                .call(key, IERC20::balanceOfCall { owner: self.wallet })
                .await
                .map(|r| TokenUpdateAction::SetFungibleValue(r._0)),
            TokenType::Erc875 => self
                .call(key, IERC875::balanceOfCall { owner: self.wallet })
                .await
                .map(|r| ticket_balance(&r._0)),
            TokenType::Erc721ForTickets => self
                .call(key, IERC721ForTickets::getBalancesCall { owner: self.wallet })
                .await
                .map(|r| ticket_balance(&r._0)),
            TokenType::Erc721 => self.erc721_balance(key).await,
            TokenType::Erc1155 => {
                let ids = token.token_ids();
                if ids.is_empty() {
                    log::debug!("balances: no known token ids for {key}");
                    return None;
                }
                self.erc1155_balance(key, ids).await
            }
        };

        match action {
            Ok(action) => Some(BalanceUpdate { key, action }),
            Err(e) => {
                log::warn!("balances: {} balance of {key} failed: {e}", token.token_type);
                None
            }
        }
    }

    async fn call<C: SolCall + Send>(&self, key: TokenKey, call: C) -> Result<C::Return, String> {
        call_contract(self.caller.as_ref(), self.chain, key.contract, call)
            .await
            .map_err(|e| e.to_string())
    }

    async fn erc721_balance(&self, key: TokenKey) -> Result<TokenUpdateAction, String> {
        let count = self
            .call(key, IERC721::balanceOfCall { owner: self.wallet })
            .await?
            ._0;
        let count = usize::try_from(count)
            .unwrap_or(usize::MAX)
            .min(MAX_ENUMERATED_NFTS);

        let lookups = (0..count).map(|index| {
            self.call(
                key,
                IERC721::tokenOfOwnerByIndexCall {
                    owner: self.wallet,
                    index: U256::from(index),
                },
            )
        });
        let owned = join_all(lookups)
            .await
            .into_iter()
            .map(|r| r.map(|r| NonFungibleBalance::owned(r._0)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("not enumerable: {e}"))?;
        Ok(TokenUpdateAction::SetNonFungibleBalance(owned))
    }

    async fn erc1155_balance(
        &self,
        key: TokenKey,
        ids: Vec<U256>,
    ) -> Result<TokenUpdateAction, String> {
        let accounts = vec![self.wallet; ids.len()];
        let values = self
            .call(
                key,
                IERC1155::balanceOfBatchCall {
                    accounts,
                    ids: ids.clone(),
                },
            )
            .await?
            ._0;
        if values.len() != ids.len() {
            return Err(format!(
                "balanceOfBatch returned {} values for {} ids",
                values.len(),
                ids.len()
            ));
        }
        let entries = ids
            .into_iter()
            .zip(values)
            .map(|(id, value)| NonFungibleBalance::new(id, value))
            .collect();
        Ok(TokenUpdateAction::SetNonFungibleBalance(entries))
    }

    async fn erc20_balances(&self, tokens: &[&Token]) -> Vec<BalanceUpdate> {
        if let (Some(multicall), true) = (self.multicall, tokens.len() > 1) {
            match self.multicall_erc20(multicall, tokens).await {
                Ok(updates) => return updates,
                Err(e) => log::warn!(
                    "balances: multicall on chain {} failed, falling back to single calls: {e}",
                    self.chain
                ),
            }
        }
        join_all(tokens.iter().map(|token| self.balance_of(token)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn multicall_erc20(
        &self,
        multicall: Address,
        tokens: &[&Token],
    ) -> Result<Vec<BalanceUpdate>, String> {
        let balance_call = Bytes::from(IERC20::balanceOfCall { owner: self.wallet }.abi_encode());
        let calls: Vec<IMulticall3::Call3> = tokens
            .iter()
            .map(|token| IMulticall3::Call3 {
                target: token.contract(),
                allowFailure: true,
                callData: balance_call.clone(),
            })
            .collect();

        let result = call_contract(
            self.caller.as_ref(),
            self.chain,
            multicall,
            IMulticall3::aggregate3Call { calls },
        )
        .await
        .map_err(|e| e.to_string())?;

        if result.returnData.len() != tokens.len() {
            return Err(format!(
                "aggregate3 returned {} results for {} calls",
                result.returnData.len(),
                tokens.len()
            ));
        }

        let mut updates = Vec::with_capacity(tokens.len());
        for (token, entry) in tokens.iter().zip(result.returnData) {
            let decoded = entry
                .success
                .then(|| IERC20::balanceOfCall::abi_decode_returns(&entry.returnData, true).ok())
                .flatten();
            match decoded {
                Some(balance) => updates.push(BalanceUpdate {
                    key: token.key,
                    action: TokenUpdateAction::SetFungibleValue(balance._0),
                }),
                None => log::warn!("balances: erc20 balance of {} failed in multicall", token.key),
            }
        }
        Ok(updates)
    }
}

/// ERC875 and ERC721-for-tickets return one slot per ticket; zero slots are empty.
fn ticket_balance(values: &[U256]) -> TokenUpdateAction {
    TokenUpdateAction::SetNonFungibleBalance(
        values
            .iter()
            .filter(|value| !value.is_zero())
            .map(|value| NonFungibleBalance::owned(*value))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::token::TokenBalance;
    use crate::test_helpers::{addr, erc20, nft, MockChainCaller};
    use alloy::providers::MULTICALL3_ADDRESS;
    use alloy::sol_types::SolValue;

    const WALLET: Address = Address::new([0xee; 20]);

    fn fetcher(caller: Arc<MockChainCaller>, multicall: Option<Address>) -> TokenBalanceFetcher {
        TokenBalanceFetcher::new(caller, WALLET, Chain::MAINNET, multicall)
    }

    fn value_of(updates: &[BalanceUpdate], contract: Address) -> Option<&TokenUpdateAction> {
        updates
            .iter()
            .find(|u| u.key.contract == contract)
            .map(|u| &u.action)
    }

    #[tokio::test]
    async fn test_erc1155_single_batched_call() {
        let caller = Arc::new(MockChainCaller::new());
        let contract = addr(0x55);
        caller.respond::<IERC1155::balanceOfBatchCall>(
            contract,
            (vec![U256::from(1), U256::ZERO, U256::from(4)],).abi_encode_params(),
        );
        let mut token = nft(Chain::MAINNET, contract, TokenType::Erc1155);
        token.balance = TokenBalance::NonFungible(
            [1u64, 2, 3]
                .into_iter()
                .map(|id| NonFungibleBalance::new(U256::from(id), U256::ZERO))
                .collect(),
        );

        let updates = fetcher(caller.clone(), None).refresh_balance(&[token]).await;
        assert_eq!(caller.calls_for(contract), 1);
        assert_eq!(
            value_of(&updates, contract),
            Some(&TokenUpdateAction::SetNonFungibleBalance(vec![
                NonFungibleBalance::new(U256::from(1), U256::from(1)),
                NonFungibleBalance::new(U256::from(2), U256::ZERO),
                NonFungibleBalance::new(U256::from(3), U256::from(4)),
            ]))
        );
    }

    #[tokio::test]
    async fn test_failed_token_does_not_block_others() {
        let caller = Arc::new(MockChainCaller::new());
        caller.fail::<IERC20::balanceOfCall>(addr(0x0a));
        caller.respond::<IERC20::balanceOfCall>(addr(0x0b), (U256::from(42),).abi_encode_params());
        caller.set_native_balance(Chain::MAINNET, WALLET, U256::from(7));

        let tokens = [
            Token::native(Chain::MAINNET),
            erc20(Chain::MAINNET, addr(0x0a), "AAA"),
            erc20(Chain::MAINNET, addr(0x0b), "BBB"),
        ];
        let updates = fetcher(caller, None).refresh_balance(&tokens).await;

        assert_eq!(updates.len(), 2);
        assert_eq!(value_of(&updates, addr(0x0a)), None);
        assert_eq!(
            value_of(&updates, addr(0x0b)),
            Some(&TokenUpdateAction::SetFungibleValue(U256::from(42)))
        );
        assert_eq!(
            value_of(&updates, Address::ZERO),
            Some(&TokenUpdateAction::SetFungibleValue(U256::from(7)))
        );
    }

    #[tokio::test]
    async fn test_multicall_batches_erc20() {
        let caller = Arc::new(MockChainCaller::new());
        let results = vec![
            IMulticall3::Result {
                success: true,
                returnData: (U256::from(5),).abi_encode_params().into(),
            },
            IMulticall3::Result {
                success: false,
                returnData: Bytes::new(),
            },
        ];
        caller.respond::<IMulticall3::aggregate3Call>(
            MULTICALL3_ADDRESS,
            IMulticall3::aggregate3Call::abi_encode_returns(&(results,)),
        );

        let tokens = [
            erc20(Chain::MAINNET, addr(0x0a), "AAA"),
            erc20(Chain::MAINNET, addr(0x0b), "BBB"),
        ];
        let updates = fetcher(caller.clone(), Some(MULTICALL3_ADDRESS))
            .refresh_balance(&tokens)
            .await;

        assert_eq!(caller.call_count(), 1);
        assert_eq!(
            updates,
            vec![BalanceUpdate {
                key: TokenKey::new(Chain::MAINNET, addr(0x0a)),
                action: TokenUpdateAction::SetFungibleValue(U256::from(5)),
            }]
        );
    }

    #[tokio::test]
    async fn test_multicall_failure_falls_back() {
        let caller = Arc::new(MockChainCaller::new());
        caller.fail::<IMulticall3::aggregate3Call>(MULTICALL3_ADDRESS);
        caller.respond::<IERC20::balanceOfCall>(addr(0x0a), (U256::from(1),).abi_encode_params());
        caller.respond::<IERC20::balanceOfCall>(addr(0x0b), (U256::from(2),).abi_encode_params());

        let tokens = [
            erc20(Chain::MAINNET, addr(0x0a), "AAA"),
            erc20(Chain::MAINNET, addr(0x0b), "BBB"),
        ];
        let updates = fetcher(caller, Some(MULTICALL3_ADDRESS))
            .refresh_balance(&tokens)
            .await;
        assert_eq!(updates.len(), 2);
    }

    #[tokio::test]
    async fn test_erc721_enumeration() {
        let caller = Arc::new(MockChainCaller::new());
        let contract = addr(0x72);
        caller.respond::<IERC721::balanceOfCall>(contract, (U256::from(2),).abi_encode_params());
        for (index, id) in [(0u64, 100u64), (1, 200)] {
            caller.respond_exact(
                contract,
                &IERC721::tokenOfOwnerByIndexCall {
                    owner: WALLET,
                    index: U256::from(index),
                },
                (U256::from(id),).abi_encode_params(),
            );
        }

        let updates = fetcher(caller, None)
            .refresh_balance(&[nft(Chain::MAINNET, contract, TokenType::Erc721)])
            .await;
        assert_eq!(
            value_of(&updates, contract),
            Some(&TokenUpdateAction::SetNonFungibleBalance(vec![
                NonFungibleBalance::owned(U256::from(100)),
                NonFungibleBalance::owned(U256::from(200)),
            ]))
        );
    }

    #[tokio::test]
    async fn test_erc875_skips_empty_slots() {
        let caller = Arc::new(MockChainCaller::new());
        let contract = addr(0x87);
        caller.respond::<IERC875::balanceOfCall>(
            contract,
            (vec![U256::ZERO, U256::from(9)],).abi_encode_params(),
        );

        let updates = fetcher(caller, None)
            .refresh_balance(&[nft(Chain::MAINNET, contract, TokenType::Erc875)])
            .await;
        assert_eq!(
            value_of(&updates, contract),
            Some(&TokenUpdateAction::SetNonFungibleBalance(vec![
                NonFungibleBalance::owned(U256::from(9))
            ]))
        );
    }
}
