//! Error types shared across services, jobs and handlers

use axum::http::StatusCode;
use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failures talking to a chain node
#[derive(Debug, Error)]
pub enum ChainClientError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("contract call error: {0}")]
    ContractCall(String),
    #[error("transaction error: {0}")]
    Transaction(String),
    #[error("max retries exceeded: {0}")]
    MaxRetriesExceeded(String),
}

impl ChainClientError {
    /// Whether another attempt may succeed without operator action
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainClientError::Provider(_) | ChainClientError::MaxRetriesExceeded(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] DbErr),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error(transparent)]
    Chain(#[from] ChainClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("chain {0} is not configured")]
    UnknownChain(u64),
}

impl IngestionError {
    /// Whether applying the same log again later may succeed. Decoding and
    /// integrity problems are not retryable; node and database outages are.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestionError::Chain(e) => e.is_transient(),
            IngestionError::Store(StoreError::Db(_)) => true,
            IngestionError::Store(_) | IngestionError::UnknownChain(_) => false,
        }
    }
}

impl From<DbErr> for IngestionError {
    fn from(e: DbErr) -> Self {
        IngestionError::Store(StoreError::Db(e))
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("webhook payload is not confirmed")]
    Unconfirmed,
    #[error("malformed webhook payload: {0}")]
    Malformed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Chain(#[from] ChainClientError),
    #[error("webhook processing timed out")]
    Timeout,
}

impl From<DbErr> for WebhookError {
    fn from(e: DbErr) -> Self {
        WebhookError::Store(StoreError::Db(e))
    }
}

impl From<IngestionError> for WebhookError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::Chain(e) => WebhookError::Chain(e),
            IngestionError::Store(e) => WebhookError::Store(e),
            IngestionError::UnknownChain(id) => {
                WebhookError::Malformed(format!("chain {} is not configured", id))
            }
        }
    }
}

impl WebhookError {
    /// Verification failures are 400 and never mutate state; anything else is a
    /// failed acknowledgment so the provider redelivers. `Malformed` only
    /// surfaces for bodies that do not parse as a payload.
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::InvalidSignature
            | WebhookError::Unconfirmed
            | WebhookError::Malformed(_) => StatusCode::BAD_REQUEST,
            WebhookError::Store(_) | WebhookError::Chain(_) | WebhookError::Timeout => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Chain(#[from] ChainClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("chain {0} is not configured")]
    UnknownChain(u64),
    #[error("no custodial key for product {0}")]
    MissingCustodialKey(String),
    #[error("quote unavailable: {0}")]
    Quote(String),
}

impl From<DbErr> for SettlementError {
    fn from(e: DbErr) -> Self {
        SettlementError::Store(StoreError::Db(e))
    }
}

impl SettlementError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SettlementError::UnknownChain(_) => StatusCode::BAD_REQUEST,
            SettlementError::MissingCustodialKey(_) => StatusCode::NOT_FOUND,
            SettlementError::Quote(_) | SettlementError::Chain(_) => StatusCode::BAD_GATEWAY,
            SettlementError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
