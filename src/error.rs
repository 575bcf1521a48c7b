use crate::domain::wallet::Address;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("amount must be a positive integer, got {0}")]
    InvalidAmount(i64),
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),
    #[error("wallet {address} cannot hold a negative balance, got {balance}")]
    NegativeBalance { address: Address, balance: i64 },
    #[error("cannot transfer to self, wallet does not exist: {0}")]
    SelfTransferWalletMissing(Address),
    #[error("wallet does not exist: {0}")]
    WalletNotFound(Address),
    #[error("insufficient balance in {address}: available {available}, requested {requested}")]
    InsufficientFunds {
        address: Address,
        available: i64,
        requested: i64,
    },
    #[error("balance overflow for wallet {0}")]
    BalanceOverflow(Address),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("store failure during {operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    pub fn store<E>(operation: &'static str, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Store {
            operation,
            source: source.into(),
        }
    }

    /// True for outcomes a caller caused (bad input, missing wallet, not
    /// enough funds) as opposed to store or process failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_)
                | Self::InvalidAddress(_)
                | Self::NegativeBalance { .. }
                | Self::SelfTransferWalletMissing(_)
                | Self::WalletNotFound(_)
                | Self::InsufficientFunds { .. }
                | Self::BalanceOverflow(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
