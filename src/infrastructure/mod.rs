//! Ledger store adapters.

pub mod in_memory;
pub mod postgres;
