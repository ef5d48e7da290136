//! Durability layer for txcoord
//!
//! This crate handles everything that touches disk:
//!
//! - Log records: one outcome decision per record, latest record per tx wins
//! - Encoding: CRC-framed bincode records
//! - Transaction log: file-backed (fsync per append) and in-memory
//! - Durability modes: Always (default), Cache
//! - Log configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod encoding;
pub mod log;
pub mod mode;
pub mod record;

pub use config::{LogConfig, LogConfigError, DEFAULT_LOG_FILE};
pub use encoding::{decode_record, encode_record};
pub use log::{scan_records, FileTransactionLog, LogScan, MemoryTransactionLog, TransactionLog};
pub use mode::DurabilityMode;
pub use record::{fold_entries, now_micros, LogRecord};
