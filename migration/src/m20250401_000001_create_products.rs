use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Products::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Products::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Products::ChainId).big_integer().not_null())
                    .col(ColumnDef::new(Products::Address).string_len(42).not_null())
                    .col(ColumnDef::new(Products::Name).string().not_null())
                    .col(ColumnDef::new(Products::Underlying).string().not_null())
                    .col(ColumnDef::new(Products::MaxCapacity).string().not_null())
                    .col(
                        ColumnDef::new(Products::CurrentCapacity)
                            .string()
                            .not_null()
                            .default("0"),
                    )
                    .col(
                        ColumnDef::new(Products::Status)
                            .small_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Products::IsPaused)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Products::IssuanceCycle).json_binary())
                    .col(ColumnDef::new(Products::PublicKey).string_len(42).not_null())
                    .col(ColumnDef::new(Products::PrivateKey).string().not_null())
                    .col(ColumnDef::new(Products::TokenAddress).string_len(42))
                    .col(ColumnDef::new(Products::PtAddress).string_len(42))
                    .col(ColumnDef::new(Products::MarketAddress).string_len(42))
                    .col(ColumnDef::new(Products::CurrencyAddress).string_len(42))
                    .col(ColumnDef::new(Products::CreatedBlock).big_integer())
                    .col(
                        ColumnDef::new(Products::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Products::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // One row per deployed contract on a chain
        manager
            .create_index(
                Index::create()
                    .name("idx_products_chain_address")
                    .table(Products::Table)
                    .col(Products::ChainId)
                    .col(Products::Address)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Products::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Products {
    Table,
    Id,
    ChainId,
    Address,
    Name,
    Underlying,
    MaxCapacity,
    CurrentCapacity,
    Status,
    IsPaused,
    IssuanceCycle,
    PublicKey,
    PrivateKey,
    TokenAddress,
    PtAddress,
    MarketAddress,
    CurrencyAddress,
    CreatedBlock,
    CreatedAt,
    UpdatedAt,
}
