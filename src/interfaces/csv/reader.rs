use crate::domain::wallet::{Address, Wallet};
use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::io::Read;

/// One requested transfer, as read from a `from,to,amount` CSV row.
///
/// Addresses are normalized while deserializing.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct TransferRecord {
    pub from: Address,
    pub to: Address,
    pub amount: i64,
}

fn csv_reader<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(source)
}

/// Reads transfer requests from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over
/// `Result<TransferRecord>`. Whitespace around fields is trimmed.
pub struct TransferReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> TransferReader<R> {
    /// Creates a new `TransferReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        Self {
            reader: csv_reader(source),
        }
    }

    /// Returns an iterator that lazily reads and deserializes transfers, so
    /// large files are streamed rather than loaded whole.
    pub fn transfers(self) -> impl Iterator<Item = Result<TransferRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}

/// Reads `address,balance` rows used to seed wallets before a replay.
pub struct WalletReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> WalletReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: csv_reader(source),
        }
    }

    pub fn wallets(self) -> impl Iterator<Item = Result<Wallet>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wallet::Balance;

    #[test]
    fn test_reader_valid_stream() {
        let data = "from, to, amount\n0xAAA, 0xbbb, 10\n0xbbb, 0xCCC, 5";
        let reader = TransferReader::new(data.as_bytes());
        let results: Vec<Result<TransferRecord>> = reader.transfers().collect();

        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.from.as_str(), "0xaaa");
        assert_eq!(first.to.as_str(), "0xbbb");
        assert_eq!(first.amount, 10);
    }

    #[test]
    fn test_reader_keeps_negative_amounts_for_the_engine() {
        let data = "from,to,amount\n0xa,0xb,-50";
        let record = TransferReader::new(data.as_bytes())
            .transfers()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(record.amount, -50);
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "from,to,amount\n0xa,0xb,not_a_number\n0xa,,1";
        let results: Vec<Result<TransferRecord>> =
            TransferReader::new(data.as_bytes()).transfers().collect();

        assert!(results[0].is_err());
        assert!(results[1].is_err(), "empty address must be rejected");
    }

    #[test]
    fn test_wallet_reader() {
        let data = "address,balance\n0xABC, 100\n0xdef,0";
        let wallets: Vec<Wallet> = WalletReader::new(data.as_bytes())
            .wallets()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(wallets.len(), 2);
        assert_eq!(wallets[0].address.as_str(), "0xabc");
        assert_eq!(wallets[0].balance, Balance(100));
    }
}
