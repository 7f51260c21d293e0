pub use sea_orm_migration::prelude::*;

mod m20250401_000001_create_products;
mod m20250401_000002_create_histories;
mod m20250401_000003_create_withdraw_requests;
mod m20250401_000004_create_users;
mod m20250401_000005_create_indexer_progress;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250401_000001_create_products::Migration),
            Box::new(m20250401_000002_create_histories::Migration),
            Box::new(m20250401_000003_create_withdraw_requests::Migration),
            Box::new(m20250401_000004_create_users::Migration),
            Box::new(m20250401_000005_create_indexer_progress::Migration),
        ]
    }
}
