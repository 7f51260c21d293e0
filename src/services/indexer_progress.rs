//! Per-chain ingestion cursor
//!
//! Tracks the last block whose logs were fully handed to the ingestion loop so a
//! restart resumes from `last_block + 1` instead of rescanning the chain.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::entities::indexer_progress::{self, Entity as IndexerProgress};
use crate::error::StoreError;

pub fn task_name(chain_id: u64) -> String {
    format!("ingest:{}", chain_id)
}

async fn find(
    db: &DatabaseConnection,
    chain_id: u64,
) -> Result<Option<indexer_progress::Model>, StoreError> {
    Ok(IndexerProgress::find()
        .filter(indexer_progress::Column::TaskName.eq(task_name(chain_id)))
        .one(db)
        .await?)
}

/// Last fully processed block, if the chain was ever indexed
pub async fn load_cursor(db: &DatabaseConnection, chain_id: u64) -> Result<Option<u64>, StoreError> {
    Ok(find(db, chain_id).await?.map(|r| r.last_block.max(0) as u64))
}

/// Record `block` as processed. The cursor never moves backwards.
pub async fn save_cursor(
    db: &DatabaseConnection,
    chain_id: u64,
    block: u64,
) -> Result<(), StoreError> {
    let now = Utc::now().fixed_offset();

    match find(db, chain_id).await? {
        Some(record) => {
            if record.last_block >= block as i64 && record.last_error.is_none() {
                return Ok(());
            }
            let last_block = record.last_block.max(block as i64);
            let mut active_model: indexer_progress::ActiveModel = record.into();
            active_model.last_block = Set(last_block);
            active_model.last_error = Set(None);
            active_model.updated_at = Set(now);
            active_model.update(db).await?;
        }
        None => {
            let new_record = indexer_progress::ActiveModel {
                task_name: Set(task_name(chain_id)),
                chain_id: Set(chain_id as i64),
                last_block: Set(block as i64),
                last_error: Set(None),
                updated_at: Set(now),
                ..Default::default()
            };
            new_record.insert(db).await?;
        }
    }

    tracing::debug!("[{}] Cursor at block {}", task_name(chain_id), block);
    Ok(())
}

/// Record a failed poll without moving the cursor
pub async fn record_failure(
    db: &DatabaseConnection,
    chain_id: u64,
    error: &str,
) -> Result<(), StoreError> {
    let Some(record) = find(db, chain_id).await? else {
        // Nothing processed yet; the next successful checkpoint creates the row
        return Ok(());
    };

    let mut active_model: indexer_progress::ActiveModel = record.into();
    active_model.last_error = Set(Some(error.to_string()));
    active_model.updated_at = Set(Utc::now().fixed_offset());
    active_model.update(db).await?;

    tracing::debug!("[{}] Recorded failure: {}", task_name(chain_id), error);
    Ok(())
}
