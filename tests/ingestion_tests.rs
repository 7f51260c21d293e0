mod common;

use alloy::primitives::{B256, U256};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use structured_products_indexer::config::IngestionSettings;
use structured_products_indexer::models::product::IssuanceCycle;
use structured_products_indexer::services::abi::{IProduct, IProductFactory};
use structured_products_indexer::services::chain_client::ProductAddresses;
use structured_products_indexer::services::indexer_progress;
use structured_products_indexer::services::ingestion::IngestionEngine;
use structured_products_indexer::services::product_store::ProductStore;

use crate::common::{CHAIN_ID, MockChainClient, addr, chain_config, factory, log_of, setup_test_db};

struct Harness {
    client: Arc<MockChainClient>,
    store: ProductStore,
    engine: IngestionEngine,
}

async fn harness() -> Harness {
    let db = setup_test_db().await.expect("Failed to set up test DB");
    let client = Arc::new(MockChainClient::new(CHAIN_ID));
    let store = ProductStore::new(db);
    let engine = IngestionEngine::new(
        chain_config(),
        client.clone(),
        store.clone(),
        IngestionSettings::default(),
    );
    Harness {
        client,
        store,
        engine,
    }
}

fn created(product: alloy::primitives::Address, name: &str, max: u64) -> IProductFactory::ProductCreated {
    IProductFactory::ProductCreated {
        product,
        name: name.to_string(),
        underlying: "BTC".to_string(),
        maxCapacity: U256::from(max),
    }
}

fn deposit(user: alloy::primitives::Address, amount: u64) -> IProduct::Deposit {
    IProduct::Deposit {
        _user: user,
        _amount: U256::from(amount),
        _tokenId: U256::from(1u64),
        _supply: U256::from(amount),
    }
}

fn wired(client: &MockChainClient, product: alloy::primitives::Address) {
    client.set_stats(product, 0, 0, 1000);
    client.set_addresses(
        product,
        ProductAddresses {
            token: addr(0x11),
            pt: addr(0x12),
            market: addr(0x13),
            currency: addr(0x14),
        },
    );
}

/// ProductCreated → product row, Deposit → ledger + held product, zero
/// principal → product released
#[tokio::test]
async fn test_product_lifecycle_end_to_end() {
    let h = harness().await;
    let product = addr(0xaa);
    let user = addr(0xbb);
    wired(&h.client, product);
    h.client.set_latest_block(100);

    let created_log = log_of(factory(), &created(product, "X", 1000), 100, B256::repeat_byte(1), 0);
    h.client.push_log(created_log.clone());
    h.engine.handle_log(&created_log).await.unwrap();

    let row = h.store.find_product(CHAIN_ID, &product).await.unwrap().unwrap();
    assert_eq!(row.name, "X");
    assert_eq!(row.status, 0);
    assert!(!row.is_paused);
    assert_eq!(row.max_capacity, "1000");
    assert!(row.public_key.starts_with("0x"));
    assert!(row.private_key.starts_with("0x"));
    assert_eq!(row.created_block, Some(100));
    assert!(h.engine.watch_set().contains(&product));

    h.client.set_principal(product, user, 500);
    h.client.set_stats(product, 1, 500, 1000);
    let deposit_log = log_of(product, &deposit(user, 500), 101, B256::repeat_byte(2), 0);
    h.engine.handle_log(&deposit_log).await.unwrap();

    let history = h.store.histories_for_user(CHAIN_ID, &user).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].history_type, "DEPOSIT");
    assert_eq!(history[0].amount, "500");
    assert_eq!(history[0].product_id, row.id);
    assert_eq!(h.store.user_product_ids(&user).await.unwrap(), vec![row.id]);

    let refreshed = h.store.find_product(CHAIN_ID, &product).await.unwrap().unwrap();
    assert_eq!(refreshed.status, 1);
    assert_eq!(refreshed.current_capacity, "500");

    h.client.set_principal(product, user, 0);
    let withdraw_log = log_of(
        product,
        &IProduct::WithdrawPrincipal {
            _user: user,
            _amount: U256::from(500u64),
            _tokenId: U256::from(1u64),
            _supply: U256::ZERO,
        },
        102,
        B256::repeat_byte(3),
        0,
    );
    h.engine.handle_log(&withdraw_log).await.unwrap();

    assert!(h.store.user_product_ids(&user).await.unwrap().is_empty());
    assert_eq!(h.store.histories_for_user(CHAIN_ID, &user).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_duplicate_delivery_is_recorded_once() {
    let h = harness().await;
    let product = addr(0xaa);
    let user = addr(0xbb);
    wired(&h.client, product);
    h.client.set_latest_block(100);

    let created_log = log_of(factory(), &created(product, "X", 1000), 100, B256::repeat_byte(1), 0);
    h.engine.handle_log(&created_log).await.unwrap();
    h.engine.handle_log(&created_log).await.unwrap();

    h.client.set_principal(product, user, 500);
    let deposit_log = log_of(product, &deposit(user, 500), 101, B256::repeat_byte(2), 4);
    h.engine.handle_log(&deposit_log).await.unwrap();
    h.engine.handle_log(&deposit_log).await.unwrap();

    let history = h.store.histories_for_user(CHAIN_ID, &user).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].log_index, 4);
    assert_eq!(history[0].amount, "500");

    let ids = h.store.user_product_ids(&user).await.unwrap();
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn test_running_balance_follows_delivery_order() {
    let h = harness().await;
    let product = addr(0xaa);
    let user = addr(0xbb);
    wired(&h.client, product);
    h.client.set_latest_block(100);
    h.client.set_principal(product, user, 1);

    let created_log = log_of(factory(), &created(product, "X", 1000), 100, B256::repeat_byte(1), 0);
    h.engine.handle_log(&created_log).await.unwrap();

    // 6 decimals: 3.0 in, 1.5 out, 2.0 in
    let events = [
        log_of(product, &deposit(user, 3_000_000), 101, B256::repeat_byte(2), 0),
        log_of(
            product,
            &IProduct::WithdrawCoupon {
                _user: user,
                _amount: U256::from(1_500_000u64),
            },
            102,
            B256::repeat_byte(3),
            0,
        ),
        log_of(product, &deposit(user, 2_000_000), 103, B256::repeat_byte(4), 0),
    ];
    for log in &events {
        h.engine.handle_log(log).await.unwrap();
    }

    let balances: Vec<_> = h
        .store
        .histories_for_user(CHAIN_ID, &user)
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.total_balance)
        .collect();
    assert_eq!(balances, vec![dec!(3), dec!(1.5), dec!(3.5)]);
}

#[tokio::test]
async fn test_status_is_monotonic_and_pause_is_orthogonal() {
    let h = harness().await;
    let product = addr(0xaa);
    wired(&h.client, product);
    h.client.set_latest_block(100);

    let created_log = log_of(factory(), &created(product, "X", 1000), 100, B256::repeat_byte(1), 0);
    h.engine.handle_log(&created_log).await.unwrap();

    h.client.set_stats(product, 3, 0, 1000);
    let issuance = log_of(
        product,
        &IProduct::Issuance {
            _timestamp: U256::from(1u64),
        },
        101,
        B256::repeat_byte(2),
        0,
    );
    h.engine.handle_log(&issuance).await.unwrap();

    // A stale read reporting an earlier status must not move it back
    h.client.set_stats(product, 1, 0, 1000);
    let accept = log_of(
        product,
        &IProduct::FundAccept {
            _timestamp: U256::from(1u64),
        },
        102,
        B256::repeat_byte(3),
        0,
    );
    h.engine.handle_log(&accept).await.unwrap();

    let paused = log_of(
        product,
        &IProduct::Paused { account: addr(0x01) },
        103,
        B256::repeat_byte(4),
        0,
    );
    h.engine.handle_log(&paused).await.unwrap();

    let row = h.store.find_product(CHAIN_ID, &product).await.unwrap().unwrap();
    assert_eq!(row.status, 3);
    assert!(row.is_paused);

    let unpaused = log_of(
        product,
        &IProduct::Unpaused { account: addr(0x01) },
        104,
        B256::repeat_byte(5),
        0,
    );
    h.engine.handle_log(&unpaused).await.unwrap();
    let row = h.store.find_product(CHAIN_ID, &product).await.unwrap().unwrap();
    assert_eq!(row.status, 3);
    assert!(!row.is_paused);
}

#[tokio::test]
async fn test_product_created_catches_up_and_backfills() {
    let h = harness().await;
    let first = addr(0xa1);
    let second = addr(0xa2);
    let user = addr(0xbb);
    wired(&h.client, first);
    wired(&h.client, second);
    h.client.set_latest_block(120);
    h.client.set_principal(second, user, 10);

    // The second product was created earlier and already took a deposit
    let second_created = log_of(factory(), &created(second, "B", 500), 110, B256::repeat_byte(1), 0);
    let second_deposit = log_of(second, &deposit(user, 10), 111, B256::repeat_byte(2), 1);
    let first_created = log_of(factory(), &created(first, "A", 1000), 115, B256::repeat_byte(3), 0);
    h.client.push_log(second_created);
    h.client.push_log(second_deposit);
    h.client.push_log(first_created.clone());

    h.engine.handle_log(&first_created).await.unwrap();

    assert!(h.store.find_product(CHAIN_ID, &first).await.unwrap().is_some());
    let second_row = h.store.find_product(CHAIN_ID, &second).await.unwrap().unwrap();
    assert_eq!(second_row.name, "B");
    assert!(h.engine.watch_set().contains(&second));

    let history = h.store.histories_for_user(CHAIN_ID, &user).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].product_id, second_row.id);
}

#[tokio::test]
async fn test_events_from_unknown_emitters_are_ignored() {
    let h = harness().await;
    let product = addr(0xaa);
    let user = addr(0xbb);
    wired(&h.client, product);
    h.client.set_latest_block(100);

    // ProductCreated from an address that is not the factory
    let spoofed = log_of(addr(0x66), &created(product, "X", 1000), 100, B256::repeat_byte(1), 0);
    h.engine.handle_log(&spoofed).await.unwrap();
    assert!(h.store.find_product(CHAIN_ID, &product).await.unwrap().is_none());

    // Deposit for a product that was never created
    let orphan = log_of(product, &deposit(user, 1), 101, B256::repeat_byte(2), 0);
    h.engine.handle_log(&orphan).await.unwrap();
    assert!(h.store.histories_for_user(CHAIN_ID, &user).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_product_updated_renames() {
    let h = harness().await;
    let product = addr(0xaa);
    wired(&h.client, product);
    h.client.set_latest_block(100);

    let created_log = log_of(factory(), &created(product, "X", 1000), 100, B256::repeat_byte(1), 0);
    h.engine.handle_log(&created_log).await.unwrap();

    let updated = log_of(
        factory(),
        &IProductFactory::ProductUpdated {
            product,
            name: "X v2".to_string(),
        },
        101,
        B256::repeat_byte(2),
        0,
    );
    h.engine.handle_log(&updated).await.unwrap();

    let row = h.store.find_product(CHAIN_ID, &product).await.unwrap().unwrap();
    assert_eq!(row.name, "X v2");
}

#[tokio::test]
async fn test_discovery_watches_unpaused_products() {
    let h = harness().await;
    let product = addr(0xaa);
    wired(&h.client, product);
    h.client.set_latest_block(100);

    let created_log = log_of(factory(), &created(product, "X", 1000), 100, B256::repeat_byte(1), 0);
    h.engine.handle_log(&created_log).await.unwrap();

    // A fresh engine on the same store picks the product up from discovery
    let engine = IngestionEngine::new(
        chain_config(),
        h.client.clone(),
        h.store.clone(),
        IngestionSettings::default(),
    );
    assert!(!engine.watch_set().contains(&product));
    assert_eq!(engine.discover().await.unwrap(), 1);
    assert!(engine.watch_set().contains(&product));
    assert!(engine.watch_set().contains(&factory()));
    assert_eq!(engine.discover().await.unwrap(), 0);
}

#[tokio::test]
async fn test_start_block_resumes_after_cursor() {
    let h = harness().await;
    h.client.set_latest_block(1000);

    // No cursor and no configured start: catch-up window below the head
    assert_eq!(h.engine.start_block().await.unwrap(), 950);

    indexer_progress::save_cursor(h.store.db(), CHAIN_ID, 900).await.unwrap();
    assert_eq!(h.engine.start_block().await.unwrap(), 901);

    // The cursor never moves backwards
    indexer_progress::save_cursor(h.store.db(), CHAIN_ID, 800).await.unwrap();
    assert_eq!(
        indexer_progress::load_cursor(h.store.db(), CHAIN_ID).await.unwrap(),
        Some(900)
    );
}

/// Settings that let `run` follow the mock chain within a test
fn fast_settings() -> IngestionSettings {
    IngestionSettings {
        discovery_interval: Duration::from_secs(1),
        poll_interval: Duration::from_millis(10),
        ..IngestionSettings::default()
    }
}

async fn wait_for_cursor(store: &ProductStore, block: u64) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let cursor = indexer_progress::load_cursor(store.db(), CHAIN_ID).await.unwrap();
            if cursor == Some(block) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "cursor never reached block {}", block);
}

struct Running {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl Running {
    fn start(h: &Harness) -> Self {
        let engine = Arc::new(IngestionEngine::new(
            chain_config(),
            h.client.clone(),
            h.store.clone(),
            fast_settings(),
        ));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(engine.run(cancel.clone()));
        Self { cancel, handle }
    }

    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("ingestion did not stop")
            .expect("ingestion task panicked");
    }
}

#[tokio::test]
async fn test_run_follows_chain_and_saves_cursor() {
    let h = harness().await;
    let product = addr(0xaa);
    let user = addr(0xbb);
    wired(&h.client, product);
    h.client.push_log(log_of(factory(), &created(product, "X", 1000), 100, B256::repeat_byte(1), 0));
    h.client.set_latest_block(100);

    let running = Running::start(&h);
    wait_for_cursor(&h.store, 100).await;
    let row = h.store.find_product(CHAIN_ID, &product).await.unwrap().unwrap();

    h.client.set_principal(product, user, 500);
    h.client.push_log(log_of(product, &deposit(user, 500), 105, B256::repeat_byte(2), 0));
    h.client.set_latest_block(105);
    wait_for_cursor(&h.store, 105).await;

    let history = h.store.histories_for_user(CHAIN_ID, &user).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].product_id, row.id);
    assert_eq!(history[0].transaction_hash, B256::repeat_byte(2).to_string());
    assert_eq!(h.store.user_product_ids(&user).await.unwrap(), vec![row.id]);

    running.stop().await;
}

#[tokio::test]
async fn test_outage_defers_log_and_holds_cursor() {
    let h = harness().await;
    let product = addr(0xaa);
    let user = addr(0xbb);
    wired(&h.client, product);
    h.client.push_log(log_of(factory(), &created(product, "X", 1000), 100, B256::repeat_byte(1), 0));
    h.client.set_latest_block(100);

    let running = Running::start(&h);
    wait_for_cursor(&h.store, 100).await;

    // First delivery and the checkpoint retry both hit the outage
    h.client.set_principal(product, user, 500);
    h.client.fail_principal_reads(2);
    h.client.push_log(log_of(product, &deposit(user, 500), 105, B256::repeat_byte(2), 0));
    h.client.set_latest_block(105);
    wait_for_cursor(&h.store, 104).await;
    assert!(h.store.histories_for_user(CHAIN_ID, &user).await.unwrap().is_empty());

    // Next checkpoint applies the parked log and releases the cursor
    h.client.set_latest_block(106);
    wait_for_cursor(&h.store, 106).await;

    let history = h.store.histories_for_user(CHAIN_ID, &user).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].amount, "500");
    assert_eq!(h.store.user_product_ids(&user).await.unwrap().len(), 1);

    running.stop().await;
}

#[tokio::test]
async fn test_redelivery_repairs_user_products() {
    let h = harness().await;
    let product = addr(0xaa);
    let user = addr(0xbb);
    wired(&h.client, product);
    h.client.set_latest_block(100);

    let created_log = log_of(factory(), &created(product, "X", 1000), 100, B256::repeat_byte(1), 0);
    h.engine.handle_log(&created_log).await.unwrap();
    let row = h.store.find_product(CHAIN_ID, &product).await.unwrap().unwrap();

    h.client.set_principal(product, user, 500);
    let deposit_log = log_of(product, &deposit(user, 500), 101, B256::repeat_byte(2), 0);
    h.engine.handle_log(&deposit_log).await.unwrap();

    // History landed but the user update did not
    h.store.remove_user_product(&user, row.id).await.unwrap();
    assert!(h.store.user_product_ids(&user).await.unwrap().is_empty());

    h.engine.handle_log(&deposit_log).await.unwrap();
    assert_eq!(h.store.user_product_ids(&user).await.unwrap(), vec![row.id]);
    assert_eq!(h.store.histories_for_user(CHAIN_ID, &user).await.unwrap().len(), 1);

    // Same repair on the release side
    h.client.set_principal(product, user, 0);
    let withdraw_log = log_of(
        product,
        &IProduct::WithdrawPrincipal {
            _user: user,
            _amount: U256::from(500u64),
            _tokenId: U256::from(1u64),
            _supply: U256::ZERO,
        },
        102,
        B256::repeat_byte(3),
        0,
    );
    h.engine.handle_log(&withdraw_log).await.unwrap();
    h.store.add_user_product(&user, row.id).await.unwrap();
    h.engine.handle_log(&withdraw_log).await.unwrap();
    assert!(h.store.user_product_ids(&user).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_issuance_cycle_follows_chain_reads() {
    let h = harness().await;
    let product = addr(0xaa);
    wired(&h.client, product);
    h.client.set_latest_block(100);

    let first = IssuanceCycle {
        underlying_spot_ref: 60000.0,
        option_min_order_size: 1.0,
        participation: 0.5,
        sub_account_id: "355261".to_string(),
        unwind_margin: 10.0,
    };
    h.client.set_cycle(product, first.clone());

    let created_log = log_of(factory(), &created(product, "X", 1000), 100, B256::repeat_byte(1), 0);
    h.engine.handle_log(&created_log).await.unwrap();
    let row = h.store.find_product(CHAIN_ID, &product).await.unwrap().unwrap();
    assert_eq!(IssuanceCycle::from_json(row.issuance_cycle.as_ref()), Some(first));

    let second = IssuanceCycle {
        underlying_spot_ref: 65000.0,
        option_min_order_size: 2.0,
        participation: 0.75,
        sub_account_id: "355262".to_string(),
        unwind_margin: 5.0,
    };
    h.client.set_cycle(product, second.clone());
    h.client.set_stats(product, 3, 0, 1000);
    let issuance = log_of(
        product,
        &IProduct::Issuance {
            _timestamp: U256::from(1u64),
        },
        101,
        B256::repeat_byte(2),
        0,
    );
    h.engine.handle_log(&issuance).await.unwrap();

    let row = h.store.find_product(CHAIN_ID, &product).await.unwrap().unwrap();
    assert_eq!(row.status, 3);
    assert_eq!(IssuanceCycle::from_json(row.issuance_cycle.as_ref()), Some(second));
}
