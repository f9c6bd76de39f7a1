#![allow(dead_code)]

use std::{
    sync::{Mutex, MutexGuard, OnceLock},
    time::{SystemTime, UNIX_EPOCH},
};

use mongodb::Client;

use stockroom::{
    config::AppConfig,
    ledger::NegativeStockPolicy,
    state::{AppState, init_state},
};

/// Global lock so integration tests that mutate the DB run one-at-a-time.
static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestContext {
    pub state: AppState,
    pub db_name: String,
    _guard: MutexGuard<'static, ()>,
}

/// Fresh database per test. Returns `None` (and the test skips) when MongoDB
/// is unreachable or not running as a replica set.
pub async fn setup_state() -> Option<TestContext> {
    let guard = TEST_DB_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let mut config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Skipping test; invalid configuration: {err:?}");
            return None;
        }
    };
    config.mongodb_db = format!(
        "stockroomtest_{}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis()
    );
    config.seed_admin_email = None;
    config.seed_admin_password = None;
    config.negative_stock = NegativeStockPolicy::Allow;
    config.upload_dir = std::env::temp_dir().join(&config.mongodb_db);

    let client = match Client::with_uri_str(&config.mongodb_uri).await {
        Ok(c) => c,
        Err(err) => {
            eprintln!("Skipping test; cannot connect to MongoDB: {err:?}");
            return None;
        }
    };
    if let Err(err) = client.database(&config.mongodb_db).drop().await {
        eprintln!("Skipping test; cannot drop test DB: {err:?}");
        return None;
    }

    let db_name = config.mongodb_db.clone();
    let state = match init_state(config).await {
        Ok(state) => state,
        Err(err) => {
            eprintln!("Skipping test; init_state failed: {err:?}");
            return None;
        }
    };
    match state.begin().await {
        Ok(tx) => tx.abort().await,
        Err(err) => {
            eprintln!("Skipping test; transactions unavailable: {err:?}");
            return None;
        }
    }

    Some(TestContext {
        state,
        db_name,
        _guard: guard,
    })
}

pub async fn teardown(ctx: Option<TestContext>) {
    if let Some(ctx) = ctx {
        let _ = ctx.state.db.drop().await;
        let _ = tokio::fs::remove_dir_all(&ctx.state.config.upload_dir).await;
        drop(ctx);
    }
}
