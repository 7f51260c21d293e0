use alloy::primitives::{Address, U256};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SettlementError;

/// Slippage tolerance sent with every PT → currency swap quote
const SWAP_SLIPPAGE: &str = "0.002";

#[derive(Debug, Deserialize)]
struct SwapResponse {
    data: SwapData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapData {
    amount_out: String,
}

/// Parameters of one PT market sell quote
#[derive(Debug, Clone)]
pub struct SwapQuoteRequest {
    pub chain_id: u64,
    pub market: Address,
    pub receiver: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
}

/// Client for the Pendle SDK swap endpoint
#[derive(Clone)]
pub struct PendleClient {
    client: Client,
    base_url: String,
}

impl PendleClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Raw output amount of selling `amount_in` PT on `market`
    pub async fn swap_amount_out(&self, req: &SwapQuoteRequest) -> Result<Decimal, SettlementError> {
        let url = format!(
            "{}/v1/sdk/{}/markets/{}/swap",
            self.base_url, req.chain_id, req.market
        );

        tracing::debug!(
            chain_id = req.chain_id,
            market = %req.market,
            amount_in = %req.amount_in,
            "Requesting PT swap quote"
        );

        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .query(&[
                ("receiver", req.receiver.to_string()),
                ("slippage", SWAP_SLIPPAGE.to_string()),
                ("enableAggregator", "false".to_string()),
                ("tokenIn", req.token_in.to_string()),
                ("tokenOut", req.token_out.to_string()),
                ("amountIn", req.amount_in.to_string()),
            ])
            .send()
            .await
            .map_err(|e| SettlementError::Quote(format!("Pendle request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SettlementError::Quote(format!(
                "Pendle API error {}: {}",
                status, error_text
            )));
        }

        let body: SwapResponse = response
            .json()
            .await
            .map_err(|e| SettlementError::Quote(format!("Invalid Pendle response: {}", e)))?;

        Decimal::from_str(&body.data.amount_out).map_err(|e| {
            SettlementError::Quote(format!("Invalid amountOut '{}': {}", body.data.amount_out, e))
        })
    }
}
