//! Transaction log
//!
//! Append-only sequence of outcome records. The coordinator appends a
//! decision before any participant hears phase two; the recovery coordinator
//! scans the whole log at startup and rewrites it without resolved entries.
//!
//! ## Implementations
//!
//! - `FileTransactionLog`: one file, every append fsynced
//! - `MemoryTransactionLog`: a vector behind a lock, for `DurabilityMode::Cache`
//!
//! ## Concurrency
//!
//! Appends serialize on the writer lock. Scans open a separate read handle
//! and never take the writer lock, so recovery reads do not wait behind
//! appends. A scan racing an append may see the append's partial bytes; they
//! decode as an incomplete tail and are skipped.

use crate::encoding::{declared_len, decode_record, encode_record};
use crate::record::LogRecord;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use txcoord_core::error::{Error, Result};

/// Durable store of outcome decisions
pub trait TransactionLog: Send + Sync {
    /// Append one record; durable (per the log's mode) when this returns
    fn append(&self, record: &LogRecord) -> Result<()>;

    /// Every record, in append order
    fn read_all(&self) -> Result<Vec<LogRecord>>;

    /// Atomically replace the whole log with `records`
    fn rewrite(&self, records: &[LogRecord]) -> Result<()>;

    /// Whether appended records survive a process crash
    fn is_durable(&self) -> bool;
}

/// Result of scanning a log file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogScan {
    /// Records decoded, in file order
    pub records: Vec<LogRecord>,
    /// Bytes occupied by the valid records
    pub valid_len: u64,
    /// Bytes after the last valid record (a torn final append)
    pub torn_bytes: u64,
}

/// Decode every record in `buf`
///
/// A damaged region that runs to the end of the buffer is a torn final write
/// and is reported through `torn_bytes`. Damage followed by more data means a
/// decision in the middle of the log is unreadable, which is an error.
pub fn scan_records(buf: &[u8]) -> Result<LogScan> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < buf.len() {
        let rest = &buf[offset..];
        match decode_record(rest, offset as u64) {
            Ok((record, consumed)) => {
                records.push(record);
                offset += consumed;
            }
            Err(Error::IncompleteEntry { .. }) => break,
            Err(Error::Corruption(msg)) => {
                let reaches_end = declared_len(rest).map_or(true, |n| n >= rest.len());
                let zero_fill = rest.iter().all(|b| *b == 0);
                if reaches_end || zero_fill {
                    debug!(offset, reason = %msg, "Treating damaged final record as torn write");
                    break;
                }
                return Err(Error::Corruption(msg));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(LogScan {
        records,
        valid_len: offset as u64,
        torn_bytes: (buf.len() - offset) as u64,
    })
}

/// File-backed transaction log
///
/// Opening the file scans it and truncates a torn final record so that later
/// appends start on a record boundary.
pub struct FileTransactionLog {
    path: PathBuf,
    writer: Mutex<File>,
    size: AtomicU64,
    torn_bytes_at_open: u64,
}

impl FileTransactionLog {
    /// Open an existing log or create an empty one
    ///
    /// Creates parent directories if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        let bytes = fs::read(&path)?;
        let scan = scan_records(&bytes)?;

        if scan.torn_bytes > 0 {
            warn!(
                path = %path.display(),
                torn_bytes = scan.torn_bytes,
                valid_records = scan.records.len(),
                "Transaction log ends in a torn record; truncating"
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }
        drop(file);

        let writer = OpenOptions::new().append(true).open(&path)?;

        debug!(path = %path.display(), records = scan.records.len(), "Opened transaction log");

        Ok(FileTransactionLog {
            path,
            writer: Mutex::new(writer),
            size: AtomicU64::new(scan.valid_len),
            torn_bytes_at_open: scan.torn_bytes,
        })
    }

    /// Scan the file from a separate read handle
    pub fn scan(&self) -> Result<LogScan> {
        let bytes = fs::read(&self.path)?;
        scan_records(&bytes)
    }

    /// Bytes of torn tail that were truncated when the log was opened
    pub fn torn_bytes_at_open(&self) -> u64 {
        self.torn_bytes_at_open
    }

    /// Current file size
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".rewrite");
        self.path.with_file_name(name)
    }
}

impl TransactionLog for FileTransactionLog {
    fn append(&self, record: &LogRecord) -> Result<()> {
        let encoded = encode_record(record)?;

        let mut writer = self.writer.lock();
        writer.write_all(&encoded)?;
        writer.sync_all()?;
        self.size.fetch_add(encoded.len() as u64, Ordering::SeqCst);

        debug!(
            tx_id = %record.tx_id,
            decision = %record.decision,
            pending = record.pending.len(),
            "Appended log record"
        );
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<LogRecord>> {
        Ok(self.scan()?.records)
    }

    fn rewrite(&self, records: &[LogRecord]) -> Result<()> {
        let mut buf = Vec::new();
        for record in records {
            buf.extend(encode_record(record)?);
        }

        let mut writer = self.writer.lock();
        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Ok(dir) = File::open(parent) {
                    let _ = dir.sync_all();
                }
            }
        }

        *writer = OpenOptions::new().append(true).open(&self.path)?;
        let old_size = self.size.swap(buf.len() as u64, Ordering::SeqCst);

        info!(
            path = %self.path.display(),
            records = records.len(),
            old_bytes = old_size,
            new_bytes = buf.len(),
            "Rewrote transaction log"
        );
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}

/// In-memory transaction log
#[derive(Default)]
pub struct MemoryTransactionLog {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryTransactionLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Check if the log holds no records
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl TransactionLog for MemoryTransactionLog {
    fn append(&self, record: &LogRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<LogRecord>> {
        Ok(self.records.lock().clone())
    }

    fn rewrite(&self, records: &[LogRecord]) -> Result<()> {
        *self.records.lock() = records.to_vec();
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}
