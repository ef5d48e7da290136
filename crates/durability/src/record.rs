//! Transaction log record
//!
//! One record per outcome decision. The log is append-only, so a transaction
//! may appear several times: the decision record written before phase two,
//! then a later record with a shorter pending list once some participants
//! confirmed. The latest record for a transaction id wins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use txcoord_core::{Decision, ResourceId, TxId};

/// Durable outcome record for one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Transaction the decision belongs to
    pub tx_id: TxId,
    /// Outcome every participant must reach
    pub decision: Decision,
    /// Participants that have not confirmed the outcome yet
    pub pending: Vec<ResourceId>,
    /// Microseconds since the Unix epoch when the record was written
    pub timestamp: u64,
}

impl LogRecord {
    /// Create a record stamped with the current time
    pub fn new(tx_id: TxId, decision: Decision, pending: Vec<ResourceId>) -> Self {
        LogRecord {
            tx_id,
            decision,
            pending,
            timestamp: now_micros(),
        }
    }

    /// Record for a transaction whose participants all confirmed
    pub fn resolved(tx_id: TxId, decision: Decision) -> Self {
        Self::new(tx_id, decision, Vec::new())
    }

    /// Check if no participant is still pending
    pub fn is_resolved(&self) -> bool {
        self.pending.is_empty()
    }

    /// Copy of this record with a new pending list and a fresh timestamp
    pub fn with_pending(&self, pending: Vec<ResourceId>) -> Self {
        Self::new(self.tx_id, self.decision, pending)
    }
}

/// Current time in microseconds since the Unix epoch
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Collapse an append-only record stream to the latest record per transaction
///
/// Output order follows the first appearance of each transaction id, so a
/// rewritten log keeps its original ordering.
pub fn fold_entries(records: &[LogRecord]) -> Vec<LogRecord> {
    let mut index: HashMap<TxId, usize> = HashMap::new();
    let mut folded: Vec<LogRecord> = Vec::new();

    for record in records {
        match index.get(&record.tx_id) {
            Some(&slot) => folded[slot] = record.clone(),
            None => {
                index.insert(record.tx_id, folded.len());
                folded.push(record.clone());
            }
        }
    }

    folded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_record_has_no_pending() {
        let record = LogRecord::resolved(TxId::new(), Decision::Committed);
        assert!(record.is_resolved());
        assert!(record.timestamp > 0);
    }

    #[test]
    fn test_fold_keeps_latest_per_tx() {
        let a = TxId::new();
        let b = TxId::new();
        let records = vec![
            LogRecord::new(a, Decision::Committed, vec!["r1".into(), "r2".into()]),
            LogRecord::new(b, Decision::RolledBack, vec!["r3".into()]),
            LogRecord::new(a, Decision::Committed, vec!["r2".into()]),
        ];

        let folded = fold_entries(&records);
        assert_eq!(folded.len(), 2);
        assert_eq!(folded[0].tx_id, a);
        assert_eq!(folded[0].pending, vec![ResourceId::from("r2")]);
        assert_eq!(folded[1].tx_id, b);
    }

    #[test]
    fn test_fold_empty() {
        assert!(fold_entries(&[]).is_empty());
    }

    #[test]
    fn test_with_pending_keeps_identity() {
        let record = LogRecord::new(TxId::new(), Decision::Committed, vec!["r1".into()]);
        let later = record.with_pending(Vec::new());
        assert_eq!(later.tx_id, record.tx_id);
        assert_eq!(later.decision, Decision::Committed);
        assert!(later.is_resolved());
    }
}
