use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Histories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Histories::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Histories::ChainId).big_integer().not_null())
                    .col(ColumnDef::new(Histories::ProductId).integer().not_null())
                    .col(ColumnDef::new(Histories::Address).string_len(42).not_null())
                    .col(ColumnDef::new(Histories::Type).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Histories::WithdrawType)
                            .string_len(32)
                            .not_null()
                            .default("NONE"),
                    )
                    .col(ColumnDef::new(Histories::Amount).string().not_null())
                    .col(
                        ColumnDef::new(Histories::AmountInDecimal)
                            .decimal()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Histories::TotalBalance)
                            .decimal()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Histories::TokenId).string())
                    .col(ColumnDef::new(Histories::Supply).string())
                    .col(
                        ColumnDef::new(Histories::TransactionHash)
                            .string_len(66)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Histories::LogIndex).big_integer().not_null())
                    .col(
                        ColumnDef::new(Histories::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Histories::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Exactly-once recording under at-least-once delivery
        manager
            .create_index(
                Index::create()
                    .name("idx_histories_tx_log")
                    .table(Histories::Table)
                    .col(Histories::TransactionHash)
                    .col(Histories::LogIndex)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_histories_chain_address")
                    .table(Histories::Table)
                    .col(Histories::ChainId)
                    .col(Histories::Address)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Histories::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Histories {
    Table,
    Id,
    ChainId,
    ProductId,
    Address,
    Type,
    WithdrawType,
    Amount,
    AmountInDecimal,
    TotalBalance,
    TokenId,
    Supply,
    TransactionHash,
    LogIndex,
    CreatedAt,
    UpdatedAt,
}
