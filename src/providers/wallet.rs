//! Wallet and transaction-status collaborators backed by ethers
//!
//! `LocalSigner` signs the aggregator's calldata with a locally held key and
//! broadcasts over the configured chain RPCs. `RpcStatusProvider` adapts
//! receipt lookups to the engine's three-valued transaction status.

use super::{StatusProvider, SwapCallData, TxStatus, WalletProvider};
use crate::config::Settings;
use crate::error::{EngineError, EngineResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

const DEFAULT_KEY_ENV: &str = "CROSSFLOW_PRIVATE_KEY";

/// Signs and broadcasts raw aggregator calldata.
pub struct LocalSigner {
    wallet: LocalWallet,
    providers: HashMap<u64, Provider<Http>>,
}

impl LocalSigner {
    pub fn from_settings(settings: &Settings) -> EngineResult<Self> {
        let key_env = settings
            .wallet
            .private_key_env
            .as_deref()
            .unwrap_or(DEFAULT_KEY_ENV);

        let key = std::env::var(key_env).map_err(|_| {
            EngineError::Wallet(format!("No wallet configured. Set {}", key_env))
        })?;

        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|e| EngineError::Wallet(format!("Invalid private key: {}", e)))?;

        let providers = build_providers(settings)?;
        info!("Wallet initialized: {:?}", wallet.address());

        Ok(Self { wallet, providers })
    }

    fn provider(&self, chain_id: u64) -> EngineResult<&Provider<Http>> {
        self.providers
            .get(&chain_id)
            .ok_or(EngineError::ChainNotFound { chain_id })
    }
}

fn build_providers(settings: &Settings) -> EngineResult<HashMap<u64, Provider<Http>>> {
    let mut providers = HashMap::new();
    for (name, chain) in settings.enabled_chains() {
        let url = chain
            .rpc_urls
            .first()
            .ok_or_else(|| EngineError::Config(format!("Chain {} has no RPC URL", name)))?;
        let provider = Provider::<Http>::try_from(url.as_str())
            .map_err(|e| EngineError::Config(format!("Bad RPC URL for {}: {}", name, e)))?;
        providers.insert(chain.chain_id, provider);
    }
    Ok(providers)
}

fn parse_u256(raw: &str) -> EngineResult<U256> {
    let parsed = if let Some(hex) = raw.strip_prefix("0x") {
        U256::from_str_radix(hex, 16)
    } else {
        U256::from_dec_str(raw)
    };
    parsed.map_err(|e| EngineError::Transaction(format!("Bad numeric field {}: {}", raw, e)))
}

fn parse_calldata(tx: &SwapCallData) -> EngineResult<TypedTransaction> {
    let to = Address::from_str(&tx.to)
        .map_err(|e| EngineError::Transaction(format!("Bad target address: {}", e)))?;

    let data = hex::decode(tx.data.trim_start_matches("0x"))
        .map_err(|e| EngineError::Transaction(format!("Bad calldata: {}", e)))?;

    let mut request = TransactionRequest::new()
        .to(to)
        .data(data)
        .value(parse_u256(&tx.value)?);

    if let Some(gas) = &tx.gas {
        request = request.gas(parse_u256(gas)?);
    }

    Ok(TypedTransaction::Legacy(request))
}

#[async_trait]
impl WalletProvider for LocalSigner {
    async fn send_transaction(&self, chain_id: u64, tx: &SwapCallData) -> EngineResult<String> {
        let provider = self.provider(chain_id)?;
        let wallet = self.wallet.clone().with_chain_id(chain_id);

        let mut typed = parse_calldata(tx)?;
        typed.set_from(wallet.address());

        let nonce = provider
            .get_transaction_count(wallet.address(), None)
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;
        typed.set_nonce(nonce);

        let gas_price = provider
            .get_gas_price()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;
        typed.set_gas_price(gas_price);

        if typed.gas().is_none() {
            let estimate = provider
                .estimate_gas(&typed, None)
                .await
                .map_err(|e| EngineError::Transaction(format!("Gas estimation failed: {}", e)))?;
            typed.set_gas(estimate);
        }

        let signature = wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| EngineError::Wallet(e.to_string()))?;

        let pending = provider
            .send_raw_transaction(typed.rlp_signed(&signature))
            .await
            .map_err(|e| map_send_error(chain_id, e.to_string()))?;

        let tx_hash = format!("{:?}", pending.tx_hash());
        debug!("Submitted transaction {} on chain {}", tx_hash, chain_id);
        Ok(tx_hash)
    }
}

fn map_send_error(chain_id: u64, message: String) -> EngineError {
    if message.contains("rejected") || message.contains("denied") {
        EngineError::Wallet(message)
    } else if message.contains("insufficient funds") {
        EngineError::Transaction(format!("Insufficient funds on chain {}", chain_id))
    } else {
        EngineError::Transaction(message)
    }
}

/// Receipt-backed status lookups.
pub struct RpcStatusProvider {
    providers: HashMap<u64, Provider<Http>>,
}

impl RpcStatusProvider {
    pub fn from_settings(settings: &Settings) -> EngineResult<Self> {
        Ok(Self {
            providers: build_providers(settings)?,
        })
    }
}

#[async_trait]
impl StatusProvider for RpcStatusProvider {
    async fn get_transaction_detail(
        &self,
        chain_id: u64,
        tx_hash: &str,
    ) -> EngineResult<TxStatus> {
        let provider = self
            .providers
            .get(&chain_id)
            .ok_or(EngineError::ChainNotFound { chain_id })?;

        let hash = H256::from_str(tx_hash)
            .map_err(|e| EngineError::Transaction(format!("Bad transaction hash: {}", e)))?;

        let receipt = provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        Ok(match receipt {
            Some(receipt) if receipt.status == Some(1.into()) => TxStatus::Success,
            Some(_) => TxStatus::Fail,
            None => TxStatus::Pending,
        })
    }
}
