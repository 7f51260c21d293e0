//! Product lifecycle types and read models

use serde::{Deserialize, Serialize};

use crate::entities::products;

/// On-chain product status. Moves forward only:
/// Pending → Accepted → Locked → Issued → Mature
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum ProductStatus {
    Pending = 0,
    Accepted = 1,
    Locked = 2,
    Issued = 3,
    Mature = 4,
}

impl ProductStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    /// Returns the later of the two statuses. Used for every status write so
    /// that out-of-order delivery can never move a product backwards.
    pub fn advance(self, observed: ProductStatus) -> ProductStatus {
        self.max(observed)
    }
}

impl TryFrom<i16> for ProductStatus {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProductStatus::Pending),
            1 => Ok(ProductStatus::Accepted),
            2 => Ok(ProductStatus::Locked),
            3 => Ok(ProductStatus::Issued),
            4 => Ok(ProductStatus::Mature),
            other => Err(format!("Unknown product status: {}", other)),
        }
    }
}

impl std::fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductStatus::Pending => write!(f, "pending"),
            ProductStatus::Accepted => write!(f, "accepted"),
            ProductStatus::Locked => write!(f, "locked"),
            ProductStatus::Issued => write!(f, "issued"),
            ProductStatus::Mature => write!(f, "mature"),
        }
    }
}

/// Settlement-pricing parameters for a product's issuance cycle.
///
/// Opaque to ingestion; read by early-withdraw pricing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceCycle {
    #[serde(default)]
    pub underlying_spot_ref: f64,
    #[serde(default)]
    pub option_min_order_size: f64,
    #[serde(default)]
    pub participation: f64,
    #[serde(default)]
    pub sub_account_id: String,
    /// Per-mille margin withheld from the option unwind value
    #[serde(default)]
    pub unwind_margin: f64,
}

impl IssuanceCycle {
    pub fn from_json(value: Option<&serde_json::Value>) -> Option<Self> {
        value.and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Product as exposed to readers. Never carries the custodial private key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductView {
    pub id: i32,
    pub chain_id: i64,
    pub address: String,
    pub name: String,
    pub underlying: String,
    pub max_capacity: String,
    pub current_capacity: String,
    pub status: i16,
    pub is_paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuance_cycle: Option<serde_json::Value>,
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pt_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency_address: Option<String>,
}

impl From<products::Model> for ProductView {
    fn from(model: products::Model) -> Self {
        Self {
            id: model.id,
            chain_id: model.chain_id,
            address: model.address,
            name: model.name,
            underlying: model.underlying,
            max_capacity: model.max_capacity,
            current_capacity: model.current_capacity,
            status: model.status,
            is_paused: model.is_paused,
            issuance_cycle: model.issuance_cycle,
            public_key: model.public_key,
            token_address: model.token_address,
            pt_address: model.pt_address,
            market_address: model.market_address,
            currency_address: model.currency_address,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductsQuery {
    pub chain_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminWalletResponse {
    pub result_public_key: String,
}
