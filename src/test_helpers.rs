use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::chain::ChainCaller;
use crate::error::{ChainCallError, HttpError};
use crate::models::chain::Chain;
use crate::models::token::{Token, TokenKey, TokenSource, TokenType};
use crate::net::HttpClient;

type CallResult = Result<Vec<u8>, ChainCallError>;

/// Scripted [`ChainCaller`].
///
/// Responses are matched on (contract, full calldata) first, then on
/// (contract, selector). Unscripted calls revert. Every call is recorded.
#[derive(Default)]
pub struct MockChainCaller {
    exact: Mutex<HashMap<(Address, Vec<u8>), CallResult>>,
    by_selector: Mutex<HashMap<(Address, [u8; 4]), CallResult>>,
    native: Mutex<HashMap<(Chain, Address), Result<U256, ChainCallError>>>,
    block_number: Mutex<Option<u64>>,
    calls: Mutex<Vec<(Address, Vec<u8>)>>,
}

#[allow(dead_code)]
impl MockChainCaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any call of `C` on `to` returns `data`.
    pub fn respond<C: SolCall>(&self, to: Address, data: Vec<u8>) {
        self.by_selector
            .lock()
            .unwrap()
            .insert((to, C::SELECTOR), Ok(data));
    }

    /// Any call of `C` on `to` fails.
    pub fn fail<C: SolCall>(&self, to: Address) {
        self.by_selector.lock().unwrap().insert(
            (to, C::SELECTOR),
            Err(ChainCallError::Transport("scripted failure".to_string())),
        );
    }

    /// This exact call (arguments included) on `to` returns `data`.
    pub fn respond_exact<C: SolCall>(&self, to: Address, call: &C, data: Vec<u8>) {
        self.exact
            .lock()
            .unwrap()
            .insert((to, call.abi_encode()), Ok(data));
    }

    pub fn fail_exact<C: SolCall>(&self, to: Address, call: &C) {
        self.exact.lock().unwrap().insert(
            (to, call.abi_encode()),
            Err(ChainCallError::Transport("scripted failure".to_string())),
        );
    }

    pub fn set_native_balance(&self, chain: Chain, owner: Address, balance: U256) {
        self.native
            .lock()
            .unwrap()
            .insert((chain, owner), Ok(balance));
    }

    pub fn set_block_number(&self, block: u64) {
        *self.block_number.lock().unwrap() = Some(block);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of calls to `to`, any function.
    pub fn calls_for(&self, to: Address) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(target, _)| *target == to)
            .count()
    }

    /// Number of calls of `C` on `to`.
    pub fn calls_to<C: SolCall>(&self, to: Address) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(target, data)| *target == to && data.starts_with(&C::SELECTOR))
            .count()
    }
}

#[async_trait]
impl ChainCaller for MockChainCaller {
    async fn call(&self, _chain: Chain, to: Address, data: Bytes) -> Result<Bytes, ChainCallError> {
        let data = data.to_vec();
        self.calls.lock().unwrap().push((to, data.clone()));

        if let Some(result) = self.exact.lock().unwrap().get(&(to, data.clone())) {
            return result.clone().map(Bytes::from);
        }
        let selector: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .unwrap_or_default();
        self.by_selector
            .lock()
            .unwrap()
            .get(&(to, selector))
            .cloned()
            .unwrap_or_else(|| Err(ChainCallError::Reverted(format!("unscripted call to {to}"))))
            .map(Bytes::from)
    }

    async fn native_balance(&self, chain: Chain, owner: Address) -> Result<U256, ChainCallError> {
        self.native
            .lock()
            .unwrap()
            .get(&(chain, owner))
            .cloned()
            .unwrap_or_else(|| Err(ChainCallError::Transport("no native balance".to_string())))
    }

    async fn block_number(&self, _chain: Chain) -> Result<u64, ChainCallError> {
        self.block_number
            .lock()
            .unwrap()
            .ok_or_else(|| ChainCallError::Transport("no block number".to_string()))
    }
}

/// Scripted [`HttpClient`] matching routes by substring.
///
/// GETs match against the URL, POSTs against `"{url} {body}"`. The first route
/// registered that matches wins; unmatched requests fail with a 404.
#[derive(Default)]
pub struct MockHttpClient {
    routes: Mutex<Vec<(String, Result<Value, HttpError>)>>,
    requests: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, pattern: &str, response: Value) {
        self.routes
            .lock()
            .unwrap()
            .push((pattern.to_string(), Ok(response)));
    }

    pub fn route_error(&self, pattern: &str, error: HttpError) {
        self.routes
            .lock()
            .unwrap()
            .push((pattern.to_string(), Err(error)));
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn respond(&self, request: String) -> Result<Value, HttpError> {
        let response = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| request.contains(pattern.as_str()))
            .map(|(_, response)| response.clone());
        self.requests.lock().unwrap().push(request);
        response.unwrap_or(Err(HttpError::Status {
            status: 404,
            body: "not found".to_string(),
        }))
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get_json(&self, url: &str, _bearer: Option<&str>) -> Result<Value, HttpError> {
        self.respond(url.to_string())
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, HttpError> {
        self.respond(format!("{url} {body}"))
    }
}

#[allow(dead_code)]
pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

#[allow(dead_code)]
pub fn erc20(chain: Chain, contract: Address, symbol: &str) -> Token {
    Token::new(
        TokenKey::new(chain, contract),
        symbol,
        symbol,
        18,
        TokenType::Erc20,
        TokenSource::Detected,
    )
}

#[allow(dead_code)]
pub fn nft(chain: Chain, contract: Address, token_type: TokenType) -> Token {
    Token::new(
        TokenKey::new(chain, contract),
        "Collectible",
        "NFT",
        0,
        token_type,
        TokenSource::Detected,
    )
}
