//! Request-entry surfaces around the transfer engine.

pub mod csv;
pub mod http;
