//! Log-aggregation provider webhook payload
//!
//! Only the fields the ingestion path reads are modelled; unknown fields are
//! ignored so provider additions do not break parsing.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub confirmed: bool,
    /// Hex chain id, e.g. "0xa4b1"
    #[serde(default)]
    pub chain_id: String,
    #[serde(default)]
    pub logs: Vec<WebhookLog>,
    #[serde(default)]
    pub txs: Vec<WebhookTx>,
    #[serde(default)]
    pub erc20_transfers: Vec<WebhookErc20Transfer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookLog {
    #[serde(default)]
    pub transaction_hash: String,
    #[serde(default)]
    pub address: String,
    /// Some provider revisions send this as a string
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    pub log_index: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTx {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub to_address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookErc20Transfer {
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    /// Raw integer amount
    #[serde(default)]
    pub value: String,
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    pub log_index: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAckResponse {
    pub message: String,
}

fn deserialize_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}
