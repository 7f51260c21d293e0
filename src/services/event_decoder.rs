//! Raw log → typed domain event
//!
//! Pure and chain-agnostic. A log whose topic0 is not one of the known
//! factory/product signatures decodes to `DecodedLog::Skip`, which keeps the
//! indexer running across contract upgrades that add events.

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolEvent;

use crate::models::history::{HistoryType, WithdrawType};
use crate::services::abi::{IProduct, IProductFactory};
use crate::services::chain_client::RawLog;

/// Where a decoded event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogMeta {
    pub emitter: Address,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

impl LogMeta {
    pub fn of(log: &RawLog) -> Self {
        Self {
            emitter: log.address,
            block_number: log.block_number,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
        }
    }
}

/// Value-moving product events, each recorded as one History row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Deposit,
    WithdrawPrincipal,
    WithdrawCoupon,
    WithdrawOption,
    OptionPayout,
}

impl TransferKind {
    pub fn history_type(self) -> HistoryType {
        match self {
            TransferKind::Deposit => HistoryType::Deposit,
            TransferKind::WithdrawPrincipal
            | TransferKind::WithdrawCoupon
            | TransferKind::WithdrawOption => HistoryType::Withdraw,
            TransferKind::OptionPayout => HistoryType::OptionPayout,
        }
    }

    pub fn withdraw_type(self) -> WithdrawType {
        match self {
            TransferKind::WithdrawPrincipal => WithdrawType::Principal,
            TransferKind::WithdrawCoupon => WithdrawType::Coupon,
            TransferKind::WithdrawOption => WithdrawType::Option,
            TransferKind::Deposit | TransferKind::OptionPayout => WithdrawType::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTransfer {
    pub kind: TransferKind,
    pub user: Address,
    pub amount: U256,
    pub token_id: Option<U256>,
    pub supply: Option<U256>,
}

/// Lifecycle transitions that only refresh on-chain stats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    FundAccept,
    FundLock,
    Issuance,
    Mature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    ProductCreated {
        product: Address,
        name: String,
        underlying: String,
        max_capacity: U256,
    },
    ProductUpdated {
        product: Address,
        name: String,
    },
    Transfer(ValueTransfer),
    Lifecycle(LifecycleKind),
    PauseChanged {
        paused: bool,
    },
}

impl ChainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChainEvent::ProductCreated { .. } => "ProductCreated",
            ChainEvent::ProductUpdated { .. } => "ProductUpdated",
            ChainEvent::Transfer(t) => match t.kind {
                TransferKind::Deposit => "Deposit",
                TransferKind::WithdrawPrincipal => "WithdrawPrincipal",
                TransferKind::WithdrawCoupon => "WithdrawCoupon",
                TransferKind::WithdrawOption => "WithdrawOption",
                TransferKind::OptionPayout => "OptionPayout",
            },
            ChainEvent::Lifecycle(kind) => match kind {
                LifecycleKind::FundAccept => "FundAccept",
                LifecycleKind::FundLock => "FundLock",
                LifecycleKind::Issuance => "Issuance",
                LifecycleKind::Mature => "Mature",
            },
            ChainEvent::PauseChanged { paused: true } => "Paused",
            ChainEvent::PauseChanged { paused: false } => "Unpaused",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedLog {
    Event { meta: LogMeta, event: ChainEvent },
    /// Unknown signature or undecodable body
    Skip { meta: LogMeta, reason: String },
}

/// topic0 values emitted by the factory
pub fn factory_signatures() -> Vec<B256> {
    vec![
        IProductFactory::ProductCreated::SIGNATURE_HASH,
        IProductFactory::ProductUpdated::SIGNATURE_HASH,
    ]
}

/// topic0 values emitted by product contracts
pub fn product_signatures() -> Vec<B256> {
    vec![
        IProduct::Deposit::SIGNATURE_HASH,
        IProduct::WithdrawPrincipal::SIGNATURE_HASH,
        IProduct::WithdrawCoupon::SIGNATURE_HASH,
        IProduct::WithdrawOption::SIGNATURE_HASH,
        IProduct::OptionPayout::SIGNATURE_HASH,
        IProduct::FundAccept::SIGNATURE_HASH,
        IProduct::FundLock::SIGNATURE_HASH,
        IProduct::Issuance::SIGNATURE_HASH,
        IProduct::Mature::SIGNATURE_HASH,
        IProduct::Paused::SIGNATURE_HASH,
        IProduct::Unpaused::SIGNATURE_HASH,
    ]
}

fn decode_as<E: SolEvent>(log: &RawLog) -> Result<E, String> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map_err(|e| format!("{} decode failed: {}", E::SIGNATURE, e))
}

pub fn decode(log: &RawLog) -> DecodedLog {
    let meta = LogMeta::of(log);

    let Some(topic0) = log.topics.first().copied() else {
        return DecodedLog::Skip {
            meta,
            reason: "anonymous log".to_string(),
        };
    };

    match decode_event(topic0, log) {
        Ok(Some(event)) => DecodedLog::Event { meta, event },
        Ok(None) => DecodedLog::Skip {
            meta,
            reason: format!("unknown signature {}", topic0),
        },
        Err(reason) => DecodedLog::Skip { meta, reason },
    }
}

fn transfer(kind: TransferKind, user: Address, amount: U256) -> ChainEvent {
    ChainEvent::Transfer(ValueTransfer {
        kind,
        user,
        amount,
        token_id: None,
        supply: None,
    })
}

fn decode_event(topic0: B256, log: &RawLog) -> Result<Option<ChainEvent>, String> {
    let event = if topic0 == IProductFactory::ProductCreated::SIGNATURE_HASH {
        let e = decode_as::<IProductFactory::ProductCreated>(log)?;
        ChainEvent::ProductCreated {
            product: e.product,
            name: e.name,
            underlying: e.underlying,
            max_capacity: e.maxCapacity,
        }
    } else if topic0 == IProductFactory::ProductUpdated::SIGNATURE_HASH {
        let e = decode_as::<IProductFactory::ProductUpdated>(log)?;
        ChainEvent::ProductUpdated {
            product: e.product,
            name: e.name,
        }
    } else if topic0 == IProduct::Deposit::SIGNATURE_HASH {
        let e = decode_as::<IProduct::Deposit>(log)?;
        ChainEvent::Transfer(ValueTransfer {
            kind: TransferKind::Deposit,
            user: e._user,
            amount: e._amount,
            token_id: Some(e._tokenId),
            supply: Some(e._supply),
        })
    } else if topic0 == IProduct::WithdrawPrincipal::SIGNATURE_HASH {
        let e = decode_as::<IProduct::WithdrawPrincipal>(log)?;
        ChainEvent::Transfer(ValueTransfer {
            kind: TransferKind::WithdrawPrincipal,
            user: e._user,
            amount: e._amount,
            token_id: Some(e._tokenId),
            supply: Some(e._supply),
        })
    } else if topic0 == IProduct::WithdrawCoupon::SIGNATURE_HASH {
        let e = decode_as::<IProduct::WithdrawCoupon>(log)?;
        transfer(TransferKind::WithdrawCoupon, e._user, e._amount)
    } else if topic0 == IProduct::WithdrawOption::SIGNATURE_HASH {
        let e = decode_as::<IProduct::WithdrawOption>(log)?;
        transfer(TransferKind::WithdrawOption, e._user, e._amount)
    } else if topic0 == IProduct::OptionPayout::SIGNATURE_HASH {
        let e = decode_as::<IProduct::OptionPayout>(log)?;
        transfer(TransferKind::OptionPayout, e._user, e._amount)
    } else if topic0 == IProduct::FundAccept::SIGNATURE_HASH {
        ChainEvent::Lifecycle(LifecycleKind::FundAccept)
    } else if topic0 == IProduct::FundLock::SIGNATURE_HASH {
        ChainEvent::Lifecycle(LifecycleKind::FundLock)
    } else if topic0 == IProduct::Issuance::SIGNATURE_HASH {
        ChainEvent::Lifecycle(LifecycleKind::Issuance)
    } else if topic0 == IProduct::Mature::SIGNATURE_HASH {
        ChainEvent::Lifecycle(LifecycleKind::Mature)
    } else if topic0 == IProduct::Paused::SIGNATURE_HASH {
        ChainEvent::PauseChanged { paused: true }
    } else if topic0 == IProduct::Unpaused::SIGNATURE_HASH {
        ChainEvent::PauseChanged { paused: false }
    } else {
        return Ok(None);
    };

    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, address};

    fn raw(emitter: Address, topics: Vec<B256>, data: Vec<u8>) -> RawLog {
        RawLog {
            address: emitter,
            topics,
            data: Bytes::from(data),
            block_number: 101,
            transaction_hash: B256::repeat_byte(0xaa),
            log_index: 3,
        }
    }

    fn encode<E: SolEvent>(event: &E) -> (Vec<B256>, Vec<u8>) {
        let log_data = event.encode_log_data();
        (log_data.topics().to_vec(), log_data.data.to_vec())
    }

    #[test]
    fn test_decode_deposit() {
        let product = address!("00000000000000000000000000000000000000aa");
        let user = address!("00000000000000000000000000000000000000bb");
        let event = IProduct::Deposit {
            _user: user,
            _amount: U256::from(500_000_000u64),
            _tokenId: U256::from(7u64),
            _supply: U256::from(10u64),
        };
        let (topics, data) = encode(&event);

        match decode(&raw(product, topics, data)) {
            DecodedLog::Event { meta, event } => {
                assert_eq!(meta.emitter, product);
                assert_eq!(meta.log_index, 3);
                assert_eq!(
                    event,
                    ChainEvent::Transfer(ValueTransfer {
                        kind: TransferKind::Deposit,
                        user,
                        amount: U256::from(500_000_000u64),
                        token_id: Some(U256::from(7u64)),
                        supply: Some(U256::from(10u64)),
                    })
                );
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_product_created() {
        let factory = address!("2Cc4BcfBFF295131ae0f3aA5c2C822a68d6489dd");
        let product = address!("00000000000000000000000000000000000000aa");
        let event = IProductFactory::ProductCreated {
            product,
            name: "X".to_string(),
            underlying: "BTC".to_string(),
            maxCapacity: U256::from(1000u64),
        };
        let (topics, data) = encode(&event);

        let decoded = decode(&raw(factory, topics, data));
        assert!(matches!(
            decoded,
            DecodedLog::Event {
                event: ChainEvent::ProductCreated { product: p, ref name, .. },
                ..
            } if p == product && name == "X"
        ));
    }

    #[test]
    fn test_unknown_signature_skips() {
        let log = raw(Address::ZERO, vec![B256::repeat_byte(0x42)], vec![]);
        assert!(matches!(decode(&log), DecodedLog::Skip { .. }));

        let anonymous = raw(Address::ZERO, vec![], vec![]);
        assert!(matches!(decode(&anonymous), DecodedLog::Skip { .. }));
    }

    #[test]
    fn test_truncated_body_skips() {
        let event = IProduct::WithdrawCoupon {
            _user: Address::ZERO,
            _amount: U256::from(1u64),
        };
        let (topics, _) = encode(&event);
        assert!(matches!(
            decode(&raw(Address::ZERO, topics, vec![0u8; 4])),
            DecodedLog::Skip { .. }
        ));
    }

    #[test]
    fn test_pause_events_and_transfer_classification() {
        let (topics, data) = encode(&IProduct::Paused { account: Address::ZERO });
        assert!(matches!(
            decode(&raw(Address::ZERO, topics, data)),
            DecodedLog::Event { event: ChainEvent::PauseChanged { paused: true }, .. }
        ));

        assert_eq!(TransferKind::WithdrawCoupon.history_type(), HistoryType::Withdraw);
        assert_eq!(TransferKind::WithdrawCoupon.withdraw_type(), WithdrawType::Coupon);
        assert_eq!(TransferKind::OptionPayout.history_type(), HistoryType::OptionPayout);
        assert_eq!(product_signatures().len(), 11);
    }
}
