use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Early-withdraw request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawRequestStatus {
    Pending,
    Success,
    Failed,
}

impl WithdrawRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawRequestStatus::Pending => "Pending",
            WithdrawRequestStatus::Success => "Success",
            WithdrawRequestStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for WithdrawRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WithdrawRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(WithdrawRequestStatus::Pending),
            "Success" => Ok(WithdrawRequestStatus::Success),
            "Failed" => Ok(WithdrawRequestStatus::Failed),
            _ => Err(format!("Unknown withdraw request status: {}", s)),
        }
    }
}

/// Aggregated option positions awaiting settlement for one product
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawList {
    pub addresses_list: Vec<String>,
    pub amounts_list: Vec<Decimal>,
    /// Rows folded into this list; marked transferred after submission
    #[serde(skip)]
    pub request_ids: Vec<i32>,
}

impl WithdrawList {
    pub fn is_empty(&self) -> bool {
        self.addresses_list.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWithdrawRequestBody {
    pub chain_id: u64,
    pub product: String,
    pub address: String,
    pub txid: String,
    pub amount_pt_unwind_price: Decimal,
    pub amount_option_unwind_price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductQuery {
    pub chain_id: u64,
    pub product_address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarlyWithdrawQuoteBody {
    pub chain_id: u64,
    pub wallet_address: String,
    pub product_address: String,
    pub no_of_block: u32,
    /// Total unwind value of the product's option book, from the options desk
    pub total_option_position: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarlyWithdrawQuote {
    pub amount_token: Decimal,
    pub amount_option: Decimal,
}
