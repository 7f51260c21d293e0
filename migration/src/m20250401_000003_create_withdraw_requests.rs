use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WithdrawRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WithdrawRequests::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WithdrawRequests::ChainId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WithdrawRequests::Product)
                            .string_len(42)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WithdrawRequests::Address)
                            .string_len(42)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WithdrawRequests::NoOfBlocks)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WithdrawRequests::AmountPtUnwindPrice)
                            .decimal()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WithdrawRequests::AmountOptionUnwindPrice)
                            .decimal()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WithdrawRequests::Status)
                            .string_len(16)
                            .not_null()
                            .default("Pending"),
                    )
                    .col(
                        ColumnDef::new(WithdrawRequests::IsTransferred)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(WithdrawRequests::Txid).string_len(66))
                    .col(
                        ColumnDef::new(WithdrawRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WithdrawRequests::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_withdraw_requests_product")
                    .table(WithdrawRequests::Table)
                    .col(WithdrawRequests::ChainId)
                    .col(WithdrawRequests::Product)
                    .col(WithdrawRequests::IsTransferred)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WithdrawRequests::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WithdrawRequests {
    Table,
    Id,
    ChainId,
    Product,
    Address,
    NoOfBlocks,
    AmountPtUnwindPrice,
    AmountOptionUnwindPrice,
    Status,
    IsTransferred,
    Txid,
    CreatedAt,
    UpdatedAt,
}
