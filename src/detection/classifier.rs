use alloy::primitives::{Address, FixedBytes};
use std::sync::Arc;

use crate::chain::{call_contract, ChainCaller};
use crate::error::ChainCallError;
use crate::models::chain::Chain;
use crate::models::token::{Token, TokenKey, TokenSource, TokenType};
use crate::utils::constants::{
    ERC1155_INTERFACE_ID, ERC721_FOR_TICKETS_INTERFACE_ID, ERC721_INTERFACE_ID,
    LEGACY_ERC721_INTERFACE_ID,
};

pub(crate) mod abi {
    alloy::sol! {
        function isStormBirdContract() external view returns (bool);
        function supportsInterface(bytes4 interfaceId) external view returns (bool);
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }
}

// Tickets first: ERC721-for-tickets contracts also advertise plain ERC721
const INTERFACE_CHECKS: [(FixedBytes<4>, TokenType); 4] = [
    (ERC721_FOR_TICKETS_INTERFACE_ID, TokenType::Erc721ForTickets),
    (ERC721_INTERFACE_ID, TokenType::Erc721),
    (ERC1155_INTERFACE_ID, TokenType::Erc1155),
    (LEGACY_ERC721_INTERFACE_ID, TokenType::Erc721),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedContract {
    pub contract: Address,
    pub token_type: TokenType,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl ClassifiedContract {
    pub fn into_token(self, chain: Chain, source: TokenSource) -> Token {
        Token::new(
            TokenKey::new(chain, self.contract),
            &self.name,
            &self.symbol,
            self.decimals,
            self.token_type,
            source,
        )
    }
}

/// Determines a contract's token standard with on-chain capability queries.
pub struct ContractClassifier {
    caller: Arc<dyn ChainCaller>,
}

impl ContractClassifier {
    pub fn new(caller: Arc<dyn ChainCaller>) -> Self {
        Self { caller }
    }

    /// Queries `contract` in order: ERC875, EIP-165 interfaces, then ERC20 metadata.
    ///
    /// `Ok(None)` means no token interface matched. Reverts and undecodable returns
    /// count as "does not support".
    ///
    /// # Errors
    /// * Transport failures, which say nothing about the contract; callers retry later
    pub async fn classify(
        &self,
        chain: Chain,
        contract: Address,
    ) -> Result<Option<ClassifiedContract>, ChainCallError> {
        let Some((token_type, decimals)) = self.detect_type(chain, contract).await? else {
            return Ok(None);
        };

        let (name, symbol) = futures::join!(
            call_contract(self.caller.as_ref(), chain, contract, abi::nameCall {}),
            call_contract(self.caller.as_ref(), chain, contract, abi::symbolCall {}),
        );

        log::debug!("detection::classifier: {contract} on chain {chain} is {token_type}");
        Ok(Some(ClassifiedContract {
            contract,
            token_type,
            name: answer(name)?.map(|r| r._0).unwrap_or_default(),
            symbol: answer(symbol)?.map(|r| r._0).unwrap_or_default(),
            decimals,
        }))
    }

    async fn detect_type(
        &self,
        chain: Chain,
        contract: Address,
    ) -> Result<Option<(TokenType, u8)>, ChainCallError> {
        let caller = self.caller.as_ref();

        let storm_bird =
            answer(call_contract(caller, chain, contract, abi::isStormBirdContractCall {}).await)?;
        if storm_bird.is_some_and(|r| r._0) {
            return Ok(Some((TokenType::Erc875, 0)));
        }

        for (interface_id, token_type) in INTERFACE_CHECKS {
            let supported = answer(
                call_contract(
                    caller,
                    chain,
                    contract,
                    abi::supportsInterfaceCall {
                        interfaceId: interface_id,
                    },
                )
                .await,
            )?;
            if supported.is_some_and(|r| r._0) {
                return Ok(Some((token_type, 0)));
            }
        }

        // ERC20 has no interface id; a decodable decimals() is the signal
        let decimals = answer(call_contract(caller, chain, contract, abi::decimalsCall {}).await)?;
        Ok(decimals.map(|r| (TokenType::Erc20, r._0)))
    }
}

/// Separates "the contract said no" from "we could not ask".
fn answer<T>(result: Result<T, ChainCallError>) -> Result<Option<T>, ChainCallError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ChainCallError::Reverted(_) | ChainCallError::Decode(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
