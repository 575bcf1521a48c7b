//! Application layer containing the transfer orchestration.
//!
//! This module defines the `TransferEngine`, the single entry point for
//! moving value between wallets. It is written against the `LedgerStore`
//! port and delegates all locking and atomicity to the store.

pub mod engine;
