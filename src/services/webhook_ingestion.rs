//! Push-based ingestion from the log-aggregation provider
//!
//! Each delivery is verified against the shared secret, classified by the
//! 4-byte selector of its first transaction, and applied through the same
//! store operations as the polling path. Value transfers are keyed by
//! `(transaction_hash, log_index)` where the log index is taken from the
//! product's own log in the payload (0 when the provider omits it), so a
//! transfer seen by both paths is recorded once.
//!
//! The transfer positions used to find user and product are provider
//! payload conventions and live in `TransferLayout`.

use alloy::primitives::{Address, B256, U256, keccak256};
use alloy::sol_types::SolCall;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{SignatureScheme, TransferLayout, WebhookSettings};
use crate::error::WebhookError;
use crate::models::product::ProductStatus;
use crate::models::webhook::{WebhookAckResponse, WebhookErc20Transfer, WebhookPayload};
use crate::services::abi::IProductActions;
use crate::services::chain_registry::{ChainHandle, ChainRegistry};
use crate::services::event_decoder::{LogMeta, TransferKind, ValueTransfer};
use crate::services::ingestion::apply_value_transfer;
use crate::services::product_store::ProductStore;

/// Product entrypoints the webhook knows how to interpret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookMethod {
    FundAccept,
    FundLock,
    Issuance,
    Mature,
    Deposit,
    WithdrawPrincipal,
    OptionWithdrawalPaid,
    Unrecognized([u8; 4]),
}

impl WebhookMethod {
    pub fn from_selector(selector: [u8; 4]) -> Self {
        let known = [
            (IProductActions::fundAcceptCall::SELECTOR, WebhookMethod::FundAccept),
            (IProductActions::fundLockCall::SELECTOR, WebhookMethod::FundLock),
            (IProductActions::issuanceCall::SELECTOR, WebhookMethod::Issuance),
            (IProductActions::matureCall::SELECTOR, WebhookMethod::Mature),
            (IProductActions::depositCall::SELECTOR, WebhookMethod::Deposit),
            (
                IProductActions::withdrawPrincipalCall::SELECTOR,
                WebhookMethod::WithdrawPrincipal,
            ),
            (
                IProductActions::optionWithdrawalPaidCall::SELECTOR,
                WebhookMethod::OptionWithdrawalPaid,
            ),
        ];
        known
            .iter()
            .find(|(known_selector, _)| *known_selector == selector)
            .map(|(_, method)| *method)
            .unwrap_or(WebhookMethod::Unrecognized(selector))
    }

    /// Classify hex call input; `None` when it is shorter than a selector
    pub fn from_input(input: &str) -> Option<Self> {
        let hex_input = input.trim().trim_start_matches("0x");
        let head = hex_input.get(..8)?;
        let bytes = hex::decode(head).ok()?;
        let selector: [u8; 4] = bytes.try_into().ok()?;
        Some(Self::from_selector(selector))
    }

    /// Status a pure lifecycle call moves the product to
    pub fn target_status(&self) -> Option<ProductStatus> {
        match self {
            WebhookMethod::FundAccept => Some(ProductStatus::Accepted),
            WebhookMethod::FundLock => Some(ProductStatus::Locked),
            WebhookMethod::Issuance => Some(ProductStatus::Issued),
            WebhookMethod::Mature => Some(ProductStatus::Mature),
            _ => None,
        }
    }
}

fn keccak_digest(secret: &str, body: &[u8]) -> B256 {
    let mut preimage = Vec::with_capacity(body.len() + secret.len());
    preimage.extend_from_slice(body);
    preimage.extend_from_slice(secret.as_bytes());
    keccak256(&preimage)
}

/// Expected signature header value for `body`
pub fn compute_signature(scheme: SignatureScheme, secret: &str, body: &[u8]) -> String {
    match scheme {
        SignatureScheme::Keccak256 => format!("0x{}", hex::encode(keccak_digest(secret, body))),
        SignatureScheme::HmacSha256 => {
            let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
                Ok(mac) => mac,
                Err(_) => return String::new(),
            };
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
    }
}

/// Check `provided` against the body. An empty secret never verifies.
pub fn verify_signature(
    scheme: SignatureScheme,
    secret: &str,
    body: &[u8],
    provided: &str,
) -> bool {
    if secret.is_empty() {
        return false;
    }
    let provided = provided.trim();
    let provided = provided
        .strip_prefix("0x")
        .or_else(|| provided.strip_prefix("0X"))
        .unwrap_or(provided);
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };

    match scheme {
        SignatureScheme::HmacSha256 => {
            let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
                return false;
            };
            mac.update(body);
            mac.verify_slice(&provided).is_ok()
        }
        SignatureScheme::Keccak256 => keccak_digest(secret, body)
            .as_slice()
            .ct_eq(&provided)
            .into(),
    }
}

/// Provider chain ids arrive as hex ("0xa4b1"); plain decimal is accepted too
pub fn parse_chain_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex_id) => u64::from_str_radix(hex_id, 16).ok(),
        None => raw.parse().ok(),
    }
}

/// User, product and amount read off the transfer list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpretedTransfer {
    pub kind: TransferKind,
    pub product: Address,
    pub user: Address,
    pub amount: U256,
}

fn parse_address(raw: &str, what: &str) -> Result<Address, WebhookError> {
    Address::from_str(raw.trim())
        .map_err(|e| WebhookError::Malformed(format!("invalid {} address '{}': {}", what, raw, e)))
}

fn transfer_at<'a>(
    transfers: &'a [WebhookErc20Transfer],
    index: usize,
) -> Result<&'a WebhookErc20Transfer, WebhookError> {
    transfers.get(index).ok_or_else(|| {
        WebhookError::Malformed(format!(
            "expected a token transfer at position {}, payload has {}",
            index,
            transfers.len()
        ))
    })
}

/// Interpret the token-transfer list for a value-moving method
pub fn interpret_transfers(
    method: WebhookMethod,
    transfers: &[WebhookErc20Transfer],
    layout: &TransferLayout,
) -> Result<Option<InterpretedTransfer>, WebhookError> {
    let (kind, product, user, value) = match method {
        WebhookMethod::Deposit => {
            let t = transfer_at(transfers, layout.deposit_index)?;
            (TransferKind::Deposit, &t.to, &t.from, &t.value)
        }
        WebhookMethod::WithdrawPrincipal => {
            let burn = transfer_at(transfers, layout.withdraw_burn_index)?;
            if parse_address(&burn.to, "burn")? != layout.burn_address {
                return Err(WebhookError::Malformed(format!(
                    "withdrawal transfer {} does not go to the burn address",
                    layout.withdraw_burn_index
                )));
            }
            let t = transfer_at(transfers, layout.withdraw_payout_index)?;
            (TransferKind::WithdrawPrincipal, &t.from, &t.to, &t.value)
        }
        WebhookMethod::OptionWithdrawalPaid => {
            let t = transfer_at(transfers, layout.option_payout_index)?;
            (TransferKind::OptionPayout, &t.from, &t.to, &t.value)
        }
        _ => return Ok(None),
    };

    let amount = U256::from_str(value.trim())
        .map_err(|e| WebhookError::Malformed(format!("invalid transfer value '{}': {}", value, e)))?;

    Ok(Some(InterpretedTransfer {
        kind,
        product: parse_address(product, "product")?,
        user: parse_address(user, "user")?,
        amount,
    }))
}

fn ack(message: impl Into<String>) -> WebhookAckResponse {
    WebhookAckResponse {
        message: message.into(),
    }
}

pub struct WebhookIngestionEngine {
    store: ProductStore,
    chains: ChainRegistry,
    settings: WebhookSettings,
}

impl WebhookIngestionEngine {
    pub fn new(store: ProductStore, chains: ChainRegistry, settings: WebhookSettings) -> Self {
        if settings.secret.is_empty() {
            warn!("WEBHOOK_SECRET not set - every webhook delivery will be rejected");
        }
        Self {
            store,
            chains,
            settings,
        }
    }

    /// Verify, classify and apply one delivery within the configured timeout
    pub async fn handle(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAckResponse, WebhookError> {
        let span = info_span!("webhook", delivery_id = %Uuid::new_v4());

        async {
            let signature = signature.ok_or(WebhookError::InvalidSignature)?;
            if !verify_signature(self.settings.scheme, &self.settings.secret, body, signature) {
                warn!("Webhook signature mismatch");
                return Err(WebhookError::InvalidSignature);
            }

            let payload: WebhookPayload = serde_json::from_slice(body)
                .map_err(|e| WebhookError::Malformed(e.to_string()))?;
            if !payload.confirmed {
                return Err(WebhookError::Unconfirmed);
            }

            match tokio::time::timeout(self.settings.timeout, self.process(payload)).await {
                // Verified and confirmed: a bad shape is acknowledged, not bounced
                Ok(Err(WebhookError::Malformed(reason))) => {
                    warn!(reason = %reason, "Malformed delivery acknowledged");
                    Ok(ack("malformed payload"))
                }
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_secs = self.settings.timeout.as_secs(), "Webhook processing timed out");
                    Err(WebhookError::Timeout)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process(&self, payload: WebhookPayload) -> Result<WebhookAckResponse, WebhookError> {
        let chain_id = parse_chain_id(&payload.chain_id).ok_or_else(|| {
            WebhookError::Malformed(format!("invalid chain id '{}'", payload.chain_id))
        })?;
        let Some(chain) = self.chains.get(chain_id) else {
            info!(chain_id = chain_id, "Webhook for unsupported chain ignored");
            return Ok(ack("unsupported chain"));
        };
        let Some(tx) = payload.txs.first() else {
            debug!(chain_id = chain_id, "Webhook without transactions");
            return Ok(ack("no transactions"));
        };

        let Some(method) = WebhookMethod::from_input(&tx.input) else {
            info!(chain_id = chain_id, input = %tx.input, "Webhook transaction has no selector");
            return Ok(ack("no method selector"));
        };

        if let WebhookMethod::Unrecognized(selector) = method {
            info!(
                chain_id = chain_id,
                selector = %format!("0x{}", hex::encode(selector)),
                "Unrecognized method selector acknowledged"
            );
            return Ok(ack("unrecognized method"));
        }

        if let Some(target) = method.target_status() {
            let product = tx
                .to_address
                .as_deref()
                .or_else(|| payload.logs.first().map(|l| l.address.as_str()))
                .ok_or_else(|| WebhookError::Malformed("no product address".to_string()))?;
            let product = parse_address(product, "product")?;

            return match self.store.advance_status(chain_id, &product, target).await? {
                Some(updated) => {
                    info!(
                        chain_id = chain_id,
                        product = %updated.address,
                        method = ?method,
                        status = updated.status,
                        "Status applied from webhook"
                    );
                    Ok(ack("status updated"))
                }
                None => Ok(ack("unknown product")),
            };
        }

        let Some(transfer) =
            interpret_transfers(method, &payload.erc20_transfers, &self.settings.layout)?
        else {
            return Ok(ack("nothing to apply"));
        };

        self.apply_transfer(chain_id, chain, &payload, &transfer).await
    }

    async fn apply_transfer(
        &self,
        chain_id: u64,
        chain: &ChainHandle,
        payload: &WebhookPayload,
        transfer: &InterpretedTransfer,
    ) -> Result<WebhookAckResponse, WebhookError> {
        let Some(product) = self.store.find_product(chain_id, &transfer.product).await? else {
            info!(chain_id = chain_id, product = %transfer.product, "Webhook transfer for unknown product");
            return Ok(ack("unknown product"));
        };

        let tx_hash = payload
            .txs
            .first()
            .and_then(|t| t.hash.clone())
            .or_else(|| payload.logs.first().map(|l| l.transaction_hash.clone()))
            .or_else(|| {
                payload
                    .erc20_transfers
                    .iter()
                    .find_map(|t| t.transaction_hash.clone())
            })
            .ok_or_else(|| WebhookError::Malformed("no transaction hash".to_string()))?;
        let transaction_hash = B256::from_str(tx_hash.trim())
            .map_err(|e| WebhookError::Malformed(format!("invalid transaction hash: {}", e)))?;

        // The product's own event log carries the index the polling path keys on
        let log_index = payload
            .logs
            .iter()
            .find(|l| {
                Address::from_str(l.address.trim())
                    .map(|a| a == transfer.product)
                    .unwrap_or(false)
            })
            .and_then(|l| l.log_index)
            .unwrap_or(0);

        // Same capacity/status refresh the polling path performs
        let stats = chain.client.product_stats(transfer.product).await?;
        let product = self
            .store
            .apply_stats(chain_id, &transfer.product, &stats)
            .await?
            .unwrap_or(product);

        let meta = LogMeta {
            emitter: transfer.product,
            block_number: 0,
            transaction_hash,
            log_index,
        };
        let value = ValueTransfer {
            kind: transfer.kind,
            user: transfer.user,
            amount: transfer.amount,
            token_id: None,
            supply: None,
        };

        let recorded = apply_value_transfer(
            &self.store,
            chain.client.as_ref(),
            chain.config.decimals,
            &product,
            transfer.product,
            &value,
            &meta,
        )
        .await?;

        Ok(ack(if recorded { "recorded" } else { "duplicate" }))
    }
}
