use super::wallet::{Address, Amount, Balance, Wallet};
use crate::error::Result;
use async_trait::async_trait;

/// A durable, transactional store of wallet balances.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a unit of work. Dropping the returned handle without calling
    /// `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>>;

    /// Committed balance of a wallet, read outside any transaction.
    async fn balance_of(&self, address: &Address) -> Result<Option<Balance>>;

    /// Sets a wallet's balance, creating the wallet if needed.
    async fn seed(&self, wallet: Wallet) -> Result<()>;

    /// All committed wallets, ordered by address.
    async fn wallets(&self) -> Result<Vec<Wallet>>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<()>;
}

/// Operations available inside an open unit of work.
///
/// Reads and writes of a balance are only meaningful once the wallet has
/// been locked by this transaction.
#[async_trait]
pub trait LedgerTransaction: Send {
    async fn exists(&mut self, address: &Address) -> Result<bool>;

    /// Inserts the wallet with a zero balance, leaving an existing one untouched.
    async fn ensure_wallet(&mut self, address: &Address) -> Result<()>;

    /// Takes an exclusive lock on the wallet, waiting for any other holder
    /// to commit or roll back.
    async fn lock(&mut self, address: &Address) -> Result<()>;

    async fn balance(&mut self, address: &Address) -> Result<Option<Balance>>;

    async fn debit(&mut self, address: &Address, amount: Amount) -> Result<()>;

    /// Adds to the wallet's balance, creating it at `amount` if absent.
    async fn credit(&mut self, address: &Address, amount: Amount) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

pub type LedgerStoreBox = Box<dyn LedgerStore>;
