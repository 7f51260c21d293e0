pub mod ingestion_job;
pub mod settlement_job;
