//! HTTP implementations of the quote and bridge collaborators
//!
//! Thin reqwest clients over the aggregator APIs. Responses arrive as
//! already-decoded JSON with string-typed amounts; errors are classified at
//! this boundary so callers see the engine taxonomy, not transport detail.

use super::{BridgeProvider, CrossChainQuote, CrossChainSwap, Quote, SwapProvider, TokenRef};
use crate::config::ProvidersConfig;
use crate::error::{classify_provider_error, EngineError, EngineResult};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Single-chain quote/price client.
pub struct HttpSwapProvider {
    client: reqwest::Client,
    base_url: String,
}

/// Cross-chain aggregator client.
pub struct HttpBridgeProvider {
    client: reqwest::Client,
    base_url: String,
}

fn build_client(config: &ProvidersConfig) -> EngineResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .map_err(|e| EngineError::Config(format!("HTTP client build failed: {}", e)))
}

impl HttpSwapProvider {
    pub fn new(config: &ProvidersConfig) -> EngineResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.quote_api_url.trim_end_matches('/').to_string(),
        })
    }
}

impl HttpBridgeProvider {
    pub fn new(config: &ProvidersConfig) -> EngineResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.bridge_api_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Decode a response, mapping transport and HTTP-level failures into the
/// engine taxonomy.
async fn decode<T: serde::de::DeserializeOwned>(
    result: Result<reqwest::Response, reqwest::Error>,
) -> EngineResult<T> {
    let response = result.map_err(|e| {
        if e.is_timeout() || e.is_connect() {
            EngineError::Network(e.to_string())
        } else {
            EngineError::Provider(e.to_string())
        }
    })?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(EngineError::RateLimited);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_provider_error(&format!("{}: {}", status, body)));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| EngineError::Provider(format!("Malformed provider response: {}", e)))
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(rename = "toTokenAmount")]
    to_token_amount: Option<String>,
    route: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: Option<String>,
}

#[async_trait]
impl SwapProvider for HttpSwapProvider {
    async fn get_quote(
        &self,
        chain_id: u64,
        from: &TokenRef,
        to: &TokenRef,
        amount_base: &str,
        slippage_bps: u32,
    ) -> EngineResult<Quote> {
        let url = format!("{}/v1/quote", self.base_url);
        let result = self
            .client
            .get(&url)
            .query(&[
                ("chainId", chain_id.to_string()),
                ("fromTokenAddress", from.address.clone()),
                ("toTokenAddress", to.address.clone()),
                ("amount", amount_base.to_string()),
                ("slippageBps", slippage_bps.to_string()),
            ])
            .send()
            .await;

        let body: QuoteResponse = decode(result).await?;
        if let Some(error) = body.error {
            return Err(classify_provider_error(&error));
        }
        let to_amount = body
            .to_token_amount
            .ok_or_else(|| EngineError::Provider("Quote missing output amount".to_string()))?;

        Ok(Quote {
            from_token: from.address.clone(),
            to_token: to.address.clone(),
            from_amount: amount_base.to_string(),
            to_amount,
            route: body.route,
        })
    }

    async fn get_token_price(
        &self,
        chain_id: u64,
        token_address: &str,
    ) -> EngineResult<Option<String>> {
        let url = format!("{}/v1/price", self.base_url);
        let result = self
            .client
            .get(&url)
            .query(&[
                ("chainId", chain_id.to_string()),
                ("tokenAddress", token_address.to_string()),
            ])
            .send()
            .await;

        let body: PriceResponse = decode(result).await?;
        Ok(body.price)
    }
}

#[derive(Debug, Deserialize)]
struct CrossChainQuoteResponse {
    #[serde(rename = "toTokenAmount")]
    to_token_amount: Option<String>,
    #[serde(rename = "estimatedTime")]
    estimated_time_secs: Option<u64>,
    #[serde(rename = "bridgeName")]
    bridge_name: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallDataResponse {
    to: String,
    data: String,
    value: Option<String>,
    gas: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossChainSwapResponse {
    tx: Option<CallDataResponse>,
    #[serde(rename = "approveData")]
    approve_data: Option<CallDataResponse>,
    #[serde(rename = "bridgeName")]
    bridge_name: Option<String>,
    #[serde(rename = "estimatedTime")]
    estimated_time_secs: Option<u64>,
    error: Option<String>,
}

impl From<CallDataResponse> for super::SwapCallData {
    fn from(raw: CallDataResponse) -> Self {
        Self {
            to: raw.to,
            data: raw.data,
            value: raw.value.unwrap_or_else(|| "0".to_string()),
            gas: raw.gas,
        }
    }
}

#[async_trait]
impl BridgeProvider for HttpBridgeProvider {
    async fn get_cross_chain_quote(
        &self,
        from_chain: u64,
        to_chain: u64,
        from: &TokenRef,
        to: &TokenRef,
        amount_base: &str,
        slippage_bps: u32,
    ) -> EngineResult<CrossChainQuote> {
        let url = format!("{}/v1/cross-chain/quote", self.base_url);
        let result = self
            .client
            .get(&url)
            .query(&[
                ("fromChainId", from_chain.to_string()),
                ("toChainId", to_chain.to_string()),
                ("fromTokenAddress", from.address.clone()),
                ("toTokenAddress", to.address.clone()),
                ("amount", amount_base.to_string()),
                ("slippageBps", slippage_bps.to_string()),
            ])
            .send()
            .await;

        let body: CrossChainQuoteResponse = decode(result).await?;
        if let Some(error) = body.error {
            return Err(classify_provider_error(&error));
        }

        let to_token_amount = body
            .to_token_amount
            .ok_or_else(|| EngineError::Provider("Quote missing output amount".to_string()))?;

        Ok(CrossChainQuote {
            to_token_amount,
            estimated_time_secs: body.estimated_time_secs.unwrap_or(0),
            bridge_name: body.bridge_name,
            error: None,
        })
    }

    async fn get_cross_chain_swap(
        &self,
        from_chain: u64,
        to_chain: u64,
        from: &TokenRef,
        to: &TokenRef,
        amount_base: &str,
        slippage_bps: u32,
        recipient: &str,
    ) -> EngineResult<CrossChainSwap> {
        let url = format!("{}/v1/cross-chain/swap", self.base_url);
        let result = self
            .client
            .get(&url)
            .query(&[
                ("fromChainId", from_chain.to_string()),
                ("toChainId", to_chain.to_string()),
                ("fromTokenAddress", from.address.clone()),
                ("toTokenAddress", to.address.clone()),
                ("amount", amount_base.to_string()),
                ("slippageBps", slippage_bps.to_string()),
                ("recipient", recipient.to_string()),
            ])
            .send()
            .await;

        let body: CrossChainSwapResponse = decode(result).await?;
        if let Some(error) = body.error {
            return Err(classify_provider_error(&error));
        }

        let tx = body
            .tx
            .ok_or_else(|| EngineError::Provider("Swap response missing transaction".to_string()))?;

        Ok(CrossChainSwap {
            tx: tx.into(),
            approve: body.approve_data.map(Into::into),
            bridge_name: body.bridge_name.unwrap_or_else(|| "unknown".to_string()),
            estimated_time_secs: body.estimated_time_secs.unwrap_or(0),
            error: None,
        })
    }
}
