//! Collaborator contracts for the engine
//!
//! The engine never talks to the outside world directly: quotes, prices,
//! bridge calldata, wallet signing, and transaction status all come through
//! the traits here. Amounts cross these boundaries as decimal or base-unit
//! strings only.

pub mod http;
pub mod wallet;

pub use http::{HttpBridgeProvider, HttpSwapProvider};
pub use wallet::{LocalSigner, RpcStatusProvider};

use crate::error::EngineResult;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Token descriptor as the dashboard hands it to us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRef {
    pub address: String,
    pub symbol: String,
    pub decimals: u32,
}

/// A single-chain swap quote. Immutable once returned; a newer quote
/// supersedes it, never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub from_token: String,
    pub to_token: String,
    /// Base units
    pub from_amount: String,
    /// Base units
    pub to_amount: String,
    pub route: Option<String>,
}

/// Cross-chain quote from the bridge aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossChainQuote {
    /// Base units on the destination chain
    pub to_token_amount: String,
    pub estimated_time_secs: u64,
    pub bridge_name: Option<String>,
    pub error: Option<String>,
}

/// Raw transaction descriptor handed to the wallet collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapCallData {
    pub to: String,
    /// 0x-prefixed hex calldata
    pub data: String,
    /// Base units of native value to attach
    pub value: String,
    pub gas: Option<String>,
}

/// Executable cross-chain swap: primary transaction plus optional ERC-20
/// approval step (absent for native-asset transfers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossChainSwap {
    pub tx: SwapCallData,
    pub approve: Option<SwapCallData>,
    pub bridge_name: String,
    pub estimated_time_secs: u64,
    pub error: Option<String>,
}

/// Transaction status as reported by the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Fail,
    Pending,
}

/// Signs and broadcasts transactions. May fail on user rejection or
/// execution failure; key management stays behind this seam.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn send_transaction(&self, chain_id: u64, tx: &SwapCallData) -> EngineResult<String>;
}

/// Single-chain quote and spot-price source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapProvider: Send + Sync {
    async fn get_quote(
        &self,
        chain_id: u64,
        from: &TokenRef,
        to: &TokenRef,
        amount_base: &str,
        slippage_bps: u32,
    ) -> EngineResult<Quote>;

    /// Current price as a decimal string; `None` when the provider has no
    /// price for this token.
    async fn get_token_price(
        &self,
        chain_id: u64,
        token_address: &str,
    ) -> EngineResult<Option<String>>;
}

/// Cross-chain quote and execution-data source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BridgeProvider: Send + Sync {
    async fn get_cross_chain_quote(
        &self,
        from_chain: u64,
        to_chain: u64,
        from: &TokenRef,
        to: &TokenRef,
        amount_base: &str,
        slippage_bps: u32,
    ) -> EngineResult<CrossChainQuote>;

    async fn get_cross_chain_swap(
        &self,
        from_chain: u64,
        to_chain: u64,
        from: &TokenRef,
        to: &TokenRef,
        amount_base: &str,
        slippage_bps: u32,
        recipient: &str,
    ) -> EngineResult<CrossChainSwap>;
}

/// Transaction-detail lookup used by the confirmation and bridge polls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusProvider: Send + Sync {
    async fn get_transaction_detail(&self, chain_id: u64, tx_hash: &str)
        -> EngineResult<TxStatus>;
}
