//! SeaORM Entity for the append-only value-transfer ledger

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "histories")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub chain_id: i64,
    pub product_id: i32,
    /// User address (checksummed 0x format)
    pub address: String,
    /// DEPOSIT, WITHDRAW or OPTION_PAYOUT
    #[sea_orm(column_name = "type")]
    pub history_type: String,
    /// NONE, PRINCIPAL, COUPON or OPTION
    pub withdraw_type: String,
    /// Raw on-chain integer amount
    pub amount: String,
    /// Amount in human units for the chain's decimal convention
    #[sea_orm(column_type = "Decimal(Some((38, 18)))")]
    pub amount_in_decimal: Decimal,
    /// Running balance for (chain_id, address) after this row
    #[sea_orm(column_type = "Decimal(Some((38, 18)))")]
    pub total_balance: Decimal,
    pub token_id: Option<String>,
    pub supply: Option<String>,
    pub transaction_hash: String,
    pub log_index: i64,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::products::Entity",
        from = "Column::ProductId",
        to = "super::products::Column::Id"
    )]
    Products,
}

impl Related<super::products::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Products.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
