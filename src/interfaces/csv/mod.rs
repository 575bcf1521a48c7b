//! CSV input and output for batch replays.

pub mod reader;
pub mod writer;
