//! SeaORM Entity for early-withdraw settlement instructions

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "withdraw_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub chain_id: i64,
    /// Product contract address
    pub product: String,
    /// User address
    pub address: String,
    pub no_of_blocks: i32,
    #[sea_orm(column_type = "Decimal(Some((38, 6)))")]
    pub amount_pt_unwind_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((38, 6)))")]
    pub amount_option_unwind_price: Decimal,
    /// Pending, Success or Failed
    pub status: String,
    pub is_transferred: bool,
    /// User-submitted early-withdraw transaction
    pub txid: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
