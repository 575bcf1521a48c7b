//! Domain types and the storage port the transfer engine is written against.

pub mod ports;
pub mod wallet;
