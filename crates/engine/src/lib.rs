//! Service layer for txcoord
//!
//! Wires the durability and coordination crates into one running service:
//! - `TxcoordConfig`: `txcoord.toml` in the data directory
//! - `TransactionService`: config, directory lock, log, recovery, manager,
//!   and timeout reaper

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod service;

pub use config::{TxcoordConfig, CONFIG_FILE_NAME};
pub use service::{TransactionService, LOCK_FILE_NAME};
