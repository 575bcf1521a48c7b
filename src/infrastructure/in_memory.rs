use crate::domain::ports::{LedgerStore, LedgerTransaction};
use crate::domain::wallet::{Address, Amount, Balance, Wallet};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// A process-local ledger with the same transactional semantics as the
/// Postgres store.
///
/// Committed balances live in `Arc<RwLock<HashMap<Address, i64>>>`. Each
/// address has its own async mutex acting as the row lock; a transaction
/// keeps the owned guards until it commits, rolls back or is dropped.
/// Writes are staged as deltas and applied in one step under the write lock,
/// so other readers never observe a half-applied transfer.
///
/// A row lock lives in `row_locks` only while some transaction holds or waits
/// for it, so the table stays as small as the set of contended wallets.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    wallets: Arc<RwLock<HashMap<Address, i64>>>,
    row_locks: Arc<SyncMutex<HashMap<Address, Arc<Mutex<()>>>>>,
}

impl InMemoryLedger {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn row_lock(&self, address: &Address) -> Arc<Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(address.clone()).or_default().clone()
    }

    /// Releases `held` and forgets every row lock nobody else references.
    fn release(&self, held: HashMap<Address, OwnedMutexGuard<()>>) {
        if held.is_empty() {
            return;
        }
        let addresses: Vec<Address> = held.keys().cloned().collect();
        drop(held);

        // Holders and waiters each keep a clone, so a count of one means the
        // table's own reference is the last.
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        for address in addresses {
            if locks.get(&address).is_some_and(|row| Arc::strong_count(row) == 1) {
                locks.remove(&address);
            }
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            ledger: self.clone(),
            held: HashMap::new(),
            created: BTreeSet::new(),
            deltas: BTreeMap::new(),
        }))
    }

    async fn balance_of(&self, address: &Address) -> Result<Option<Balance>> {
        let wallets = self.wallets.read().await;
        Ok(wallets.get(address).copied().map(Balance))
    }

    async fn seed(&self, wallet: Wallet) -> Result<()> {
        if wallet.balance.is_negative() {
            return Err(LedgerError::NegativeBalance {
                balance: wallet.balance.value(),
                address: wallet.address,
            });
        }
        let mut wallets = self.wallets.write().await;
        wallets.insert(wallet.address, wallet.balance.value());
        Ok(())
    }

    async fn wallets(&self) -> Result<Vec<Wallet>> {
        let wallets = self.wallets.read().await;
        let mut all: Vec<Wallet> = wallets
            .iter()
            .map(|(address, balance)| Wallet::new(address.clone(), Balance(*balance)))
            .collect();
        all.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(all)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// An open unit of work against an [`InMemoryLedger`].
pub struct InMemoryTransaction {
    ledger: InMemoryLedger,
    held: HashMap<Address, OwnedMutexGuard<()>>,
    created: BTreeSet<Address>,
    deltas: BTreeMap<Address, i64>,
}

impl InMemoryTransaction {
    fn ensure_locked(&self, operation: &'static str, address: &Address) -> Result<()> {
        if self.held.contains_key(address) {
            Ok(())
        } else {
            Err(LedgerError::store(
                operation,
                format!("wallet {address} is not locked by this transaction"),
            ))
        }
    }

    async fn committed(&self, address: &Address) -> Option<i64> {
        self.ledger.wallets.read().await.get(address).copied()
    }

    fn apply_delta(&mut self, address: &Address, delta: i64) -> Result<()> {
        let entry = self.deltas.entry(address.clone()).or_insert(0);
        *entry = entry
            .checked_add(delta)
            .ok_or_else(|| LedgerError::BalanceOverflow(address.clone()))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn exists(&mut self, address: &Address) -> Result<bool> {
        Ok(self.created.contains(address) || self.committed(address).await.is_some())
    }

    async fn ensure_wallet(&mut self, address: &Address) -> Result<()> {
        if self.committed(address).await.is_none() {
            self.created.insert(address.clone());
        }
        Ok(())
    }

    async fn lock(&mut self, address: &Address) -> Result<()> {
        if self.held.contains_key(address) {
            return Ok(());
        }
        let row = self.ledger.row_lock(address);
        let guard = row.lock_owned().await;
        self.held.insert(address.clone(), guard);
        Ok(())
    }

    async fn balance(&mut self, address: &Address) -> Result<Option<Balance>> {
        self.ensure_locked("balance", address)?;
        let base = match self.committed(address).await {
            Some(balance) => balance,
            None if self.created.contains(address) => 0,
            None => return Ok(None),
        };
        let delta = self.deltas.get(address).copied().unwrap_or(0);
        base.checked_add(delta)
            .map(|balance| Some(Balance(balance)))
            .ok_or_else(|| LedgerError::BalanceOverflow(address.clone()))
    }

    async fn debit(&mut self, address: &Address, amount: Amount) -> Result<()> {
        self.ensure_locked("debit", address)?;
        if !self.exists(address).await? {
            return Err(LedgerError::WalletNotFound(address.clone()));
        }
        self.apply_delta(address, -amount.value())
    }

    async fn credit(&mut self, address: &Address, amount: Amount) -> Result<()> {
        self.ensure_locked("credit", address)?;
        if self.committed(address).await.is_none() {
            self.created.insert(address.clone());
        }
        self.apply_delta(address, amount.value())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut wallets = self.ledger.wallets.write().await;

        // Validate everything before touching committed state.
        let touched: BTreeSet<&Address> = self.created.iter().chain(self.deltas.keys()).collect();
        let mut updates = Vec::with_capacity(touched.len());
        for address in touched {
            let base = wallets.get(address).copied().unwrap_or(0);
            let delta = self.deltas.get(address).copied().unwrap_or(0);
            let next = base
                .checked_add(delta)
                .ok_or_else(|| LedgerError::BalanceOverflow(address.clone()))?;
            if next < 0 {
                return Err(LedgerError::store(
                    "commit",
                    format!("balance of {address} would become negative"),
                ));
            }
            updates.push((address.clone(), next));
        }
        for (address, balance) in updates {
            wallets.insert(address, balance);
        }

        // Publish the writes before the row locks go with `self`.
        drop(wallets);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.ledger.release(std::mem::take(&mut self.held));
    }
}
