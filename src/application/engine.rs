use crate::domain::ports::{LedgerStore, LedgerStoreBox, LedgerTransaction};
use crate::domain::wallet::{Address, Amount, Balance, lock_order};
use crate::error::{LedgerError, Result};
use tracing::{debug, info, instrument, warn};

/// Moves value between wallets.
///
/// `TransferEngine` holds no mutable state of its own: all coordination
/// between concurrent transfers happens through the store's row locks, so a
/// single engine can be shared across tasks behind an `Arc`.
pub struct TransferEngine {
    store: LedgerStoreBox,
}

impl TransferEngine {
    /// Creates a new `TransferEngine` on top of the given ledger store.
    pub fn new(store: LedgerStoreBox) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }

    /// Debits `amount` from `from` and credits it to `to` in one store
    /// transaction, returning the sender's new balance.
    ///
    /// The receiver is created on first credit; the sender must already
    /// exist. Both wallets are locked in address order before any balance is
    /// read, which keeps concurrent transfers over the same pair from
    /// deadlocking. On every failure the transaction is rolled back and no
    /// balance changes. Dropping the returned future before it completes
    /// drops the open transaction, which also rolls it back.
    #[instrument(skip_all, fields(from = %from, to = %to, amount = amount))]
    pub async fn transfer(&self, from: &Address, to: &Address, amount: i64) -> Result<Balance> {
        let amount = Amount::new(amount)?;

        if from == to {
            return match self.store.balance_of(from).await? {
                Some(balance) => {
                    debug!(balance = balance.value(), "self-transfer, balance unchanged");
                    Ok(balance)
                }
                None => Err(LedgerError::SelfTransferWalletMissing(from.clone())),
            };
        }

        let mut tx = self.store.begin().await?;
        match Self::apply(&mut *tx, from, to, amount).await {
            Ok(balance) => {
                tx.commit().await?;
                info!(balance = balance.value(), "transfer committed");
                Ok(balance)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                debug!(error = %err, "transfer rolled back");
                Err(err)
            }
        }
    }

    async fn apply(
        tx: &mut dyn LedgerTransaction,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<Balance> {
        // Checked before the receiver upsert so a doomed transfer never
        // materializes a new wallet.
        if !tx.exists(from).await? {
            return Err(LedgerError::WalletNotFound(from.clone()));
        }

        tx.ensure_wallet(to).await?;

        let (first, second) = lock_order(from, to);
        tx.lock(first).await?;
        tx.lock(second).await?;
        debug!(first = %first, second = %second, "wallets locked");

        let current = tx
            .balance(from)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(from.clone()))?;

        if !current.covers(amount) {
            return Err(LedgerError::InsufficientFunds {
                address: from.clone(),
                available: current.value(),
                requested: amount.value(),
            });
        }
        let remaining = current
            .checked_debit(amount)
            .ok_or_else(|| LedgerError::BalanceOverflow(from.clone()))?;

        tx.debit(from, amount).await?;
        tx.credit(to, amount).await?;

        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wallet::Wallet;
    use crate::infrastructure::in_memory::InMemoryLedger;
    use async_trait::async_trait;

    fn addr(raw: &str) -> Address {
        Address::new(raw).unwrap()
    }

    async fn engine_with(wallets: &[(&str, i64)]) -> (TransferEngine, InMemoryLedger) {
        let ledger = InMemoryLedger::new();
        for (address, balance) in wallets {
            ledger
                .seed(Wallet::new(addr(address), Balance(*balance)))
                .await
                .unwrap();
        }
        (TransferEngine::new(Box::new(ledger.clone())), ledger)
    }

    #[tokio::test]
    async fn test_transfer_moves_funds() {
        let (engine, ledger) = engine_with(&[("0xa", 100), ("0xb", 5)]).await;

        let balance = engine.transfer(&addr("0xa"), &addr("0xb"), 30).await.unwrap();

        assert_eq!(balance, Balance(70));
        assert_eq!(ledger.balance_of(&addr("0xa")).await.unwrap(), Some(Balance(70)));
        assert_eq!(ledger.balance_of(&addr("0xb")).await.unwrap(), Some(Balance(35)));
    }

    #[tokio::test]
    async fn test_transfer_creates_receiver() {
        let (engine, ledger) = engine_with(&[("0xa", 10)]).await;

        engine.transfer(&addr("0xa"), &addr("0xNEW"), 4).await.unwrap();
        engine.transfer(&addr("0xa"), &addr("0xnew"), 4).await.unwrap();

        assert_eq!(ledger.balance_of(&addr("0xnew")).await.unwrap(), Some(Balance(8)));
        assert_eq!(ledger.balance_of(&addr("0xa")).await.unwrap(), Some(Balance(2)));
    }

    #[tokio::test]
    async fn test_exact_balance_can_be_spent() {
        let (engine, ledger) = engine_with(&[("0xa", 10)]).await;
        let balance = engine.transfer(&addr("0xa"), &addr("0xb"), 10).await.unwrap();
        assert_eq!(balance, Balance::ZERO);
        assert_eq!(ledger.balance_of(&addr("0xb")).await.unwrap(), Some(Balance(10)));
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_balances() {
        let (engine, ledger) = engine_with(&[("0xpoor", 10)]).await;

        let result = engine.transfer(&addr("0xPOOR"), &addr("0xRICH"), 20).await;

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientFunds {
                available: 10,
                requested: 20,
                ..
            })
        ));
        assert_eq!(ledger.balance_of(&addr("0xpoor")).await.unwrap(), Some(Balance(10)));
        // The receiver upsert was rolled back with everything else.
        assert_eq!(ledger.balance_of(&addr("0xrich")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected() {
        let (engine, ledger) = engine_with(&[("0xa", 10), ("0xb", 10)]).await;

        for amount in [-50, 0] {
            let result = engine.transfer(&addr("0xa"), &addr("0xb"), amount).await;
            assert!(matches!(result, Err(LedgerError::InvalidAmount(a)) if a == amount));
        }
        assert_eq!(ledger.balance_of(&addr("0xa")).await.unwrap(), Some(Balance(10)));
        assert_eq!(ledger.balance_of(&addr("0xb")).await.unwrap(), Some(Balance(10)));
    }

    #[tokio::test]
    async fn test_missing_sender_creates_nothing() {
        let (engine, ledger) = engine_with(&[]).await;

        let result = engine.transfer(&addr("0xX"), &addr("0xY"), 1).await;

        assert!(matches!(result, Err(LedgerError::WalletNotFound(a)) if a.as_str() == "0xx"));
        assert!(ledger.wallets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_self_transfer_is_noop() {
        let (engine, ledger) = engine_with(&[("0xself", 25)]).await;

        let balance = engine
            .transfer(&addr("0xSELF"), &addr("0xself"), 10)
            .await
            .unwrap();

        assert_eq!(balance, Balance(25));
        assert_eq!(ledger.balance_of(&addr("0xself")).await.unwrap(), Some(Balance(25)));
    }

    #[tokio::test]
    async fn test_self_transfer_of_missing_wallet_fails() {
        let (engine, _) = engine_with(&[]).await;
        let result = engine.transfer(&addr("0xghost"), &addr("0xghost"), 1).await;
        assert!(matches!(result, Err(LedgerError::SelfTransferWalletMissing(_))));
    }

    #[tokio::test]
    async fn test_self_transfer_still_validates_amount() {
        let (engine, _) = engine_with(&[("0xself", 25)]).await;
        let result = engine.transfer(&addr("0xself"), &addr("0xself"), -1).await;
        assert!(matches!(result, Err(LedgerError::InvalidAmount(-1))));
    }

    #[tokio::test]
    async fn test_receiver_overflow_rolls_back() {
        let (engine, ledger) = engine_with(&[("0xa", 10), ("0xb", i64::MAX)]).await;

        let result = engine.transfer(&addr("0xa"), &addr("0xb"), 1).await;

        assert!(matches!(result, Err(LedgerError::BalanceOverflow(_))));
        assert_eq!(ledger.balance_of(&addr("0xa")).await.unwrap(), Some(Balance(10)));
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Fault {
        Begin,
        Lock,
        Credit,
        Commit,
    }

    /// Wraps an in-memory ledger and injects a store failure at one step of
    /// the transaction.
    struct FaultyLedger {
        inner: InMemoryLedger,
        fault: Fault,
    }

    struct FaultyTransaction {
        inner: Box<dyn LedgerTransaction>,
        fault: Fault,
    }

    #[async_trait]
    impl LedgerStore for FaultyLedger {
        async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
            if self.fault == Fault::Begin {
                return Err(LedgerError::StoreUnavailable("pool timed out".to_string()));
            }
            Ok(Box::new(FaultyTransaction {
                inner: self.inner.begin().await?,
                fault: self.fault,
            }))
        }

        async fn balance_of(&self, address: &Address) -> Result<Option<Balance>> {
            self.inner.balance_of(address).await
        }

        async fn seed(&self, wallet: Wallet) -> Result<()> {
            self.inner.seed(wallet).await
        }

        async fn wallets(&self) -> Result<Vec<Wallet>> {
            self.inner.wallets().await
        }

        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }
    }

    #[async_trait]
    impl LedgerTransaction for FaultyTransaction {
        async fn exists(&mut self, address: &Address) -> Result<bool> {
            self.inner.exists(address).await
        }

        async fn ensure_wallet(&mut self, address: &Address) -> Result<()> {
            self.inner.ensure_wallet(address).await
        }

        async fn lock(&mut self, address: &Address) -> Result<()> {
            if self.fault == Fault::Lock {
                return Err(LedgerError::store("lock", "lock wait timeout"));
            }
            self.inner.lock(address).await
        }

        async fn balance(&mut self, address: &Address) -> Result<Option<Balance>> {
            self.inner.balance(address).await
        }

        async fn debit(&mut self, address: &Address, amount: Amount) -> Result<()> {
            self.inner.debit(address, amount).await
        }

        async fn credit(&mut self, address: &Address, amount: Amount) -> Result<()> {
            if self.fault == Fault::Credit {
                return Err(LedgerError::store("credit", "connection reset"));
            }
            self.inner.credit(address, amount).await
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            if self.fault == Fault::Commit {
                // Dropping the inner transaction discards everything staged.
                drop(self.inner);
                return Err(LedgerError::store("commit", "connection closed"));
            }
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            self.inner.rollback().await
        }
    }

    async fn faulty_engine(fault: Fault) -> (TransferEngine, InMemoryLedger) {
        let ledger = InMemoryLedger::new();
        ledger
            .seed(Wallet::new(addr("0xa"), Balance(10)))
            .await
            .unwrap();
        let engine = TransferEngine::new(Box::new(FaultyLedger {
            inner: ledger.clone(),
            fault,
        }));
        (engine, ledger)
    }

    async fn assert_untouched(ledger: &InMemoryLedger) {
        assert_eq!(ledger.balance_of(&addr("0xa")).await.unwrap(), Some(Balance(10)));
        assert_eq!(ledger.balance_of(&addr("0xb")).await.unwrap(), None);

        // Whatever locks the failed transfer took are free again.
        let engine = TransferEngine::new(Box::new(ledger.clone()));
        engine.transfer(&addr("0xa"), &addr("0xb"), 3).await.unwrap();
    }

    #[tokio::test]
    async fn test_begin_failure_surfaces_unavailable() {
        let (engine, ledger) = faulty_engine(Fault::Begin).await;

        let result = engine.transfer(&addr("0xa"), &addr("0xb"), 3).await;

        assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));
        assert_untouched(&ledger).await;
    }

    #[tokio::test]
    async fn test_lock_failure_rolls_back_receiver() {
        let (engine, ledger) = faulty_engine(Fault::Lock).await;

        let result = engine.transfer(&addr("0xa"), &addr("0xb"), 3).await;

        assert!(matches!(result, Err(LedgerError::Store { operation: "lock", .. })));
        assert_untouched(&ledger).await;
    }

    #[tokio::test]
    async fn test_store_failure_mid_transfer_rolls_back_debit() {
        let (engine, ledger) = faulty_engine(Fault::Credit).await;

        let result = engine.transfer(&addr("0xa"), &addr("0xb"), 3).await;

        assert!(matches!(result, Err(LedgerError::Store { operation: "credit", .. })));
        assert_untouched(&ledger).await;
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_no_partial_transfer() {
        let (engine, ledger) = faulty_engine(Fault::Commit).await;

        let result = engine.transfer(&addr("0xa"), &addr("0xb"), 3).await;

        assert!(matches!(result, Err(LedgerError::Store { operation: "commit", .. })));
        assert_untouched(&ledger).await;
    }

    #[tokio::test]
    async fn test_cancelled_transfer_commits_nothing() {
        let (engine, ledger) = engine_with(&[("0xa", 10), ("0xb", 0)]).await;

        // Hold the receiver's lock so the transfer parks mid-transaction.
        let mut blocker = ledger.begin().await.unwrap();
        blocker.lock(&addr("0xb")).await.unwrap();

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            engine.transfer(&addr("0xa"), &addr("0xb"), 5),
        )
        .await;
        assert!(pending.is_err(), "transfer should be waiting on the lock");

        blocker.rollback().await.unwrap();
        assert_eq!(ledger.balance_of(&addr("0xa")).await.unwrap(), Some(Balance(10)));
        assert_eq!(ledger.balance_of(&addr("0xb")).await.unwrap(), Some(Balance(0)));

        // The dropped transfer released its own lock on 0xa.
        engine.transfer(&addr("0xa"), &addr("0xb"), 5).await.unwrap();
        assert_eq!(ledger.balance_of(&addr("0xb")).await.unwrap(), Some(Balance(5)));
    }
}
