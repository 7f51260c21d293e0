use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Outcome object returned by write endpoints instead of an error status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub result: String,
}

impl ActionResult {
    pub fn new(result: impl Into<String>) -> Self {
        Self { result: result.into() }
    }
}
