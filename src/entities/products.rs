//! SeaORM Entity for structured products tracked on-chain
//!
//! One row per (chain_id, address). The custodial private key is stored here
//! but never serialized; external reads go through `ProductView`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub chain_id: i64,
    /// Product contract address (checksummed 0x format)
    pub address: String,
    pub name: String,
    /// Underlying asset symbol (e.g., "BTC")
    pub underlying: String,
    /// Raw integer string, avoids float precision loss
    pub max_capacity: String,
    pub current_capacity: String,
    /// 0=Pending, 1=Accepted, 2=Locked, 3=Issued, 4=Mature
    pub status: i16,
    pub is_paused: bool,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub issuance_cycle: Option<Json>,
    /// Custodial wallet address used for settlement calls
    pub public_key: String,
    #[serde(skip_serializing)]
    pub private_key: String,
    pub token_address: Option<String>,
    pub pt_address: Option<String>,
    pub market_address: Option<String>,
    pub currency_address: Option<String>,
    /// Block of the ProductCreated log that introduced this product
    pub created_block: Option<i64>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::histories::Entity")]
    Histories,
}

impl Related<super::histories::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Histories.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
