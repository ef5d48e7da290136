//! Torn-write and corruption handling for the file log
//!
//! - A partial final append is truncated on open and later appends decode
//! - Damage in the middle of the log refuses to open
//! - Any truncation point yields a prefix of the written records

use proptest::prelude::*;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use tempfile::TempDir;
use txcoord_core::{Decision, ResourceId, TxId};
use txcoord_durability::{
    encode_record, scan_records, FileTransactionLog, LogRecord, TransactionLog,
};

fn record(decision: Decision, pending: &[&str]) -> LogRecord {
    LogRecord::new(
        TxId::new(),
        decision,
        pending.iter().map(|p| ResourceId::from(*p)).collect(),
    )
}

#[test]
fn test_partial_append_truncated_on_open() {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("tx.log");

    let r1 = record(Decision::Committed, &["orders", "billing"]);
    let r2 = record(Decision::RolledBack, &[]);
    let valid_len;
    {
        let log = FileTransactionLog::open(&log_path).unwrap();
        log.append(&r1).unwrap();
        log.append(&r2).unwrap();
        valid_len = log.size();
    }

    // Simulate a crash part way through a third append
    {
        let partial = encode_record(&record(Decision::Committed, &["x"])).unwrap();
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(&partial[..partial.len() - 5]).unwrap();
        file.sync_all().unwrap();
    }

    let log = FileTransactionLog::open(&log_path).unwrap();
    assert!(log.torn_bytes_at_open() > 0);
    assert_eq!(log.size(), valid_len);
    assert_eq!(log.read_all().unwrap(), vec![r1.clone(), r2.clone()]);

    let r3 = record(Decision::Committed, &[]);
    log.append(&r3).unwrap();
    assert_eq!(log.read_all().unwrap(), vec![r1, r2, r3]);
}

#[test]
fn test_mid_log_bit_flip_refuses_open() {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("tx.log");

    {
        let log = FileTransactionLog::open(&log_path).unwrap();
        log.append(&record(Decision::Committed, &["a"])).unwrap();
        log.append(&record(Decision::Committed, &["b"])).unwrap();
    }

    {
        let mut file = OpenOptions::new().write(true).open(&log_path).unwrap();
        file.seek(SeekFrom::Start(10)).unwrap();
        file.write_all(&[0xAB, 0xCD]).unwrap();
        file.sync_all().unwrap();
    }

    assert!(FileTransactionLog::open(&log_path).is_err());
}

#[test]
fn test_rewrite_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("tx.log");
    let keep = record(Decision::Committed, &["inventory"]);

    {
        let log = FileTransactionLog::open(&log_path).unwrap();
        for _ in 0..10 {
            log.append(&record(Decision::Committed, &[])).unwrap();
        }
        log.append(&keep).unwrap();
        log.rewrite(std::slice::from_ref(&keep)).unwrap();
    }

    let log = FileTransactionLog::open(&log_path).unwrap();
    assert_eq!(log.read_all().unwrap(), vec![keep]);
}

proptest! {
    #[test]
    fn prop_truncation_yields_prefix(
        pending in prop::collection::vec(prop::collection::vec("[a-z]{1,8}", 0..4), 1..8),
        cut_fraction in 0.0f64..1.0,
    ) {
        let records: Vec<LogRecord> = pending
            .iter()
            .enumerate()
            .map(|(i, names)| {
                let decision = if i % 2 == 0 { Decision::Committed } else { Decision::RolledBack };
                LogRecord::new(TxId::new(), decision, names.iter().map(|n| ResourceId::from(n.as_str())).collect())
            })
            .collect();

        let mut buf = Vec::new();
        for r in &records {
            buf.extend(encode_record(r).unwrap());
        }
        let cut = (buf.len() as f64 * cut_fraction) as usize;

        let scan = scan_records(&buf[..cut]).unwrap();
        prop_assert!(scan.records.len() <= records.len());
        prop_assert_eq!(&scan.records[..], &records[..scan.records.len()]);
        prop_assert_eq!(scan.valid_len + scan.torn_bytes, cut as u64);
    }
}
