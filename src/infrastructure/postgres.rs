use crate::domain::ports::{LedgerStore, LedgerTransaction};
use crate::domain::wallet::{Address, Amount, Balance, Wallet};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, warn};

/// Schema for the wallets table. Addresses are stored lowercased and
/// balances can never be committed below zero.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
    address TEXT PRIMARY KEY CHECK (address = lower(address)),
    balance BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0)
)
"#;

/// SQLSTATE for `numeric_value_out_of_range`, raised when a `BIGINT`
/// balance would overflow.
const NUMERIC_OUT_OF_RANGE: &str = "22003";

fn is_out_of_range(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == NUMERIC_OUT_OF_RANGE)
}

/// How long to keep waiting for the database during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(2),
        }
    }
}

/// A durable ledger backed by PostgreSQL.
///
/// Row locks are `SELECT ... FOR UPDATE`, receiver credits are
/// `INSERT ... ON CONFLICT DO UPDATE` with an additive merge. Cloning shares
/// the underlying pool.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url`, waiting for the server to accept
    /// connections for up to `retry.attempts` pings.
    pub async fn connect(database_url: &str, retry: RetryPolicy) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)
            .map_err(|e| LedgerError::StoreUnavailable(e.to_string()))?;

        let attempts = retry.attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match sqlx::query("SELECT 1").execute(&pool).await {
                Ok(_) => {
                    info!(attempt, "PostgreSQL connection pool established");
                    return Ok(Self { pool });
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "database is not ready");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(retry.interval).await;
                    }
                }
            }
        }

        Err(LedgerError::StoreUnavailable(format!(
            "could not connect after {attempts} attempts: {last_error}"
        )))
    }

    /// Creates the wallets table if it does not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::store("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::StoreUnavailable(format!("failed to begin transaction: {e}")))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn balance_of(&self, address: &Address) -> Result<Option<Balance>> {
        let balance = sqlx::query_scalar::<_, i64>("SELECT balance FROM wallets WHERE address = $1")
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::store("balance_of", e))?;
        Ok(balance.map(Balance))
    }

    async fn seed(&self, wallet: Wallet) -> Result<()> {
        if wallet.balance.is_negative() {
            return Err(LedgerError::NegativeBalance {
                balance: wallet.balance.value(),
                address: wallet.address,
            });
        }
        sqlx::query(
            r#"
            INSERT INTO wallets (address, balance) VALUES ($1, $2)
            ON CONFLICT (address) DO UPDATE SET balance = EXCLUDED.balance
            "#,
        )
        .bind(wallet.address.as_str())
        .bind(wallet.balance.value())
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::store("seed", e))?;
        Ok(())
    }

    async fn wallets(&self) -> Result<Vec<Wallet>> {
        // "C" collation keeps the order byte-wise, matching `Address: Ord`.
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"SELECT address, balance FROM wallets ORDER BY address COLLATE "C""#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::store("wallets", e))?;

        rows.into_iter()
            .map(|(address, balance)| -> Result<Wallet> {
                Ok(Wallet::new(Address::new(&address)?, Balance(balance)))
            })
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}

/// An open PostgreSQL transaction. Dropping it without `commit` rolls back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PostgresTransaction {
    async fn exists(&mut self, address: &Address) -> Result<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM wallets WHERE address = $1)")
            .bind(address.as_str())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| LedgerError::store("exists", e))
    }

    async fn ensure_wallet(&mut self, address: &Address) -> Result<()> {
        sqlx::query(
            "INSERT INTO wallets (address, balance) VALUES ($1, 0) ON CONFLICT (address) DO NOTHING",
        )
        .bind(address.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| LedgerError::store("ensure_wallet", e))?;
        Ok(())
    }

    async fn lock(&mut self, address: &Address) -> Result<()> {
        sqlx::query("SELECT 1 FROM wallets WHERE address = $1 FOR UPDATE")
            .bind(address.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| LedgerError::store("lock", e))?;
        Ok(())
    }

    async fn balance(&mut self, address: &Address) -> Result<Option<Balance>> {
        let balance = sqlx::query_scalar::<_, i64>("SELECT balance FROM wallets WHERE address = $1")
            .bind(address.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| LedgerError::store("balance", e))?;
        Ok(balance.map(Balance))
    }

    async fn debit(&mut self, address: &Address, amount: Amount) -> Result<()> {
        let result = sqlx::query("UPDATE wallets SET balance = balance - $1 WHERE address = $2")
            .bind(amount.value())
            .bind(address.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| LedgerError::store("debit", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::WalletNotFound(address.clone()));
        }
        Ok(())
    }

    async fn credit(&mut self, address: &Address, amount: Amount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (address, balance) VALUES ($1, $2)
            ON CONFLICT (address) DO UPDATE SET balance = wallets.balance + EXCLUDED.balance
            "#,
        )
        .bind(address.as_str())
        .bind(amount.value())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_out_of_range(&e) {
                LedgerError::BalanceOverflow(address.clone())
            } else {
                LedgerError::store("credit", e)
            }
        })?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| LedgerError::store("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| LedgerError::store("rollback", e))
    }
}
