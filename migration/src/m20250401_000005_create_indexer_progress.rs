use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One cursor per chain ingestion task
        manager
            .create_table(
                Table::create()
                    .table(IndexerProgress::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IndexerProgress::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(IndexerProgress::TaskName)
                            .string_len(100)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(IndexerProgress::ChainId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IndexerProgress::LastBlock)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IndexerProgress::LastError)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(IndexerProgress::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IndexerProgress::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum IndexerProgress {
    Table,
    Id,
    TaskName,
    ChainId,
    LastBlock,
    LastError,
    UpdatedAt,
}
