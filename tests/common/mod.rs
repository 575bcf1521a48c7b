#![allow(dead_code)]

use rand::Rng;
use std::io::{Error, Write};
use std::path::Path;
use std::sync::Arc;
use wallet_ledger::application::engine::TransferEngine;
use wallet_ledger::domain::ports::LedgerStore;
use wallet_ledger::domain::wallet::{Address, Balance, Wallet};
use wallet_ledger::infrastructure::in_memory::InMemoryLedger;
use wallet_ledger::infrastructure::postgres::{PostgresLedger, RetryPolicy};

pub fn addr(raw: &str) -> Address {
    Address::new(raw).unwrap()
}

/// An engine over a fresh in-memory ledger seeded with `wallets`, plus a
/// handle on the ledger for assertions.
pub async fn in_memory_engine(wallets: &[(&str, i64)]) -> (Arc<TransferEngine>, InMemoryLedger) {
    let ledger = InMemoryLedger::new();
    seed(&ledger, wallets).await;
    (Arc::new(TransferEngine::new(Box::new(ledger.clone()))), ledger)
}

pub async fn seed(store: &dyn LedgerStore, wallets: &[(&str, i64)]) {
    for (address, balance) in wallets {
        store
            .seed(Wallet::new(addr(address), Balance(*balance)))
            .await
            .unwrap();
    }
}

pub async fn balance(store: &dyn LedgerStore, address: &str) -> Option<i64> {
    store
        .balance_of(&addr(address))
        .await
        .unwrap()
        .map(|b| b.value())
}

/// Connects to the database named by `TEST_DATABASE_URL`, or returns `None`
/// so the caller can skip.
pub async fn postgres_ledger() -> Option<PostgresLedger> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let retry = RetryPolicy {
        attempts: 1,
        interval: std::time::Duration::from_millis(0),
    };
    let ledger = PostgresLedger::connect(&url, retry).await.ok()?;
    ledger.migrate().await.ok()?;
    Some(ledger)
}

/// A random suffix so concurrent test runs against one database never share
/// wallets.
pub fn unique(prefix: &str) -> String {
    let suffix: u64 = rand::thread_rng().r#gen();
    format!("{prefix}_{suffix:x}")
}

pub fn write_csv(path: &Path, header: &str, rows: &[&str]) -> Result<(), Error> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "{header}")?;
    for row in rows {
        writeln!(file, "{row}")?;
    }
    file.flush()
}

/// Writes `rows` transfers of one unit, alternating between `0xa -> 0xb` and
/// `0xb -> 0xa`.
pub fn generate_transfers_csv(path: &Path, rows: usize) -> Result<(), Error> {
    let file = std::fs::File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["from", "to", "amount"])?;

    for i in 0..rows {
        let (from, to) = if i % 2 == 0 { ("0xa", "0xb") } else { ("0xb", "0xa") };
        wtr.write_record([from, to, "1"])?;
    }

    wtr.flush()?;
    Ok(())
}
