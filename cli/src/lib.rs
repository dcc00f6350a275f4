//! paperbook-cli: paper trading from the command line.
//!
//! Reads settings from a TOML file, keeps the ledger in a JSON state file,
//! loads quotes and history from a JSON market data file, and appends every
//! state change to a JSONL audit trail.

pub mod audit;
pub mod commands;
pub mod config;
pub mod error;
pub mod market;
