//! Transaction lifecycle states and the receipt shape reported by the network.
//!
//! ```text
//! PENDING ──► PROPOSING ──► COMMITTED ──► ACCEPTED ──► FINALIZED
//!    └─────────────┴────────────┴─────────────┴──► ERROR | UNDETERMINED | CANCELED
//! ```
//!
//! The network only ever moves a receipt forward along this order; the
//! failure states are terminal.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a submitted transaction.
///
/// Variant order is significant: the derived `Ord` is the progress order
/// used by [`reached`]. The terminal failure states sort after the success
/// path but are never treated as progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Proposing,
    #[serde(alias = "COMMITTING", alias = "REVEALING")]
    Committed,
    Accepted,
    Finalized,
    Error,
    Undetermined,
    Canceled,
}

impl TransactionStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::Undetermined | Self::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Proposing => "PROPOSING",
            Self::Committed => "COMMITTED",
            Self::Accepted => "ACCEPTED",
            Self::Finalized => "FINALIZED",
            Self::Error => "ERROR",
            Self::Undetermined => "UNDETERMINED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of comparing an observed status against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Target (or something beyond it) has been reached.
    Reached,
    /// Still on the way; poll again.
    Waiting,
    /// The transaction died in a terminal failure state.
    Failed(TransactionStatus),
}

/// Compare an observed status against the status a caller is waiting for.
///
/// A failure status is reported as [`Progress::Failed`] whatever the target.
pub fn reached(observed: TransactionStatus, target: TransactionStatus) -> Progress {
    if observed.is_failure() {
        Progress::Failed(observed)
    } else if observed >= target {
        Progress::Reached
    } else {
        Progress::Waiting
    }
}

/// Outcome of the leader's execution of a contract call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionResult {
    Success,
    Error,
    Timeout,
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Timeout => "TIMEOUT",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderReceipt {
    pub execution_result: ExecutionResult,
    /// Opaque payload produced by the call.
    #[serde(rename = "result", default, skip_serializing_if = "Value::is_null")]
    pub result_data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_receipt: Option<LeaderReceipt>,
}

/// Point-in-time snapshot of a transaction as reported by the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    #[serde(rename = "hash")]
    pub transaction_hash: String,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_data: Option<ConsensusData>,
    #[serde(rename = "triggered_transactions", default)]
    pub triggered_transaction_hashes: Vec<String>,
    #[serde(rename = "data", default, skip_serializing_if = "Value::is_null")]
    pub output_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl TransactionReceipt {
    /// What the network reports for a handle it has not processed yet.
    pub fn pending(hash: impl Into<String>) -> Self {
        Self {
            transaction_hash: hash.into(),
            status: TransactionStatus::Pending,
            consensus_data: None,
            triggered_transaction_hashes: Vec::new(),
            output_data: Value::Null,
            created_at: None,
        }
    }

    pub fn leader_receipt(&self) -> Option<&LeaderReceipt> {
        self.consensus_data.as_ref()?.leader_receipt.as_ref()
    }

    pub fn execution_result(&self) -> Option<ExecutionResult> {
        self.leader_receipt().map(|r| r.execution_result)
    }

    pub fn succeeded(&self) -> bool {
        self.execution_result() == Some(ExecutionResult::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALL: [TransactionStatus; 8] = [
        TransactionStatus::Pending,
        TransactionStatus::Proposing,
        TransactionStatus::Committed,
        TransactionStatus::Accepted,
        TransactionStatus::Finalized,
        TransactionStatus::Error,
        TransactionStatus::Undetermined,
        TransactionStatus::Canceled,
    ];

    #[test]
    fn accepted_target_is_met_by_finalized() {
        use TransactionStatus::*;
        assert_eq!(reached(Accepted, Accepted), Progress::Reached);
        assert_eq!(reached(Finalized, Accepted), Progress::Reached);
        assert_eq!(reached(Committed, Accepted), Progress::Waiting);
        assert_eq!(reached(Pending, Finalized), Progress::Waiting);
    }

    #[test]
    fn failure_states_fail_regardless_of_target() {
        for target in ALL {
            for failed in [
                TransactionStatus::Error,
                TransactionStatus::Undetermined,
                TransactionStatus::Canceled,
            ] {
                assert_eq!(reached(failed, target), Progress::Failed(failed));
            }
        }
    }

    #[test]
    fn reached_is_monotonic_along_the_success_path() {
        let path = &ALL[..5];
        for target in path {
            for (i, s) in path.iter().enumerate() {
                if reached(*s, *target) == Progress::Reached {
                    for later in &path[i..] {
                        assert_eq!(reached(*later, *target), Progress::Reached);
                    }
                }
            }
        }
    }

    #[test]
    fn deserialize_network_receipt() {
        let raw = json!({
            "hash": "0xdeadbeef",
            "status": "FINALIZED",
            "consensus_data": {
                "final": true,
                "leader_receipt": {
                    "execution_result": "SUCCESS",
                    "result": { "address": "0xabc" },
                    "gas_used": 0
                },
                "validators": []
            },
            "triggered_transactions": ["0x01", "0x02"],
            "data": { "contract_address": "0xabc" },
            "created_at": "2024-11-05T10:00:00Z",
            "from_address": "0x0000000000000000000000000000000000000001"
        });

        let receipt: TransactionReceipt = serde_json::from_value(raw).unwrap();
        assert_eq!(receipt.transaction_hash, "0xdeadbeef");
        assert_eq!(receipt.status, TransactionStatus::Finalized);
        assert!(receipt.succeeded());
        assert_eq!(receipt.triggered_transaction_hashes, vec!["0x01", "0x02"]);
        assert_eq!(receipt.output_data["contract_address"], "0xabc");
        assert_eq!(
            receipt.leader_receipt().unwrap().result_data["address"],
            "0xabc"
        );
        assert!(receipt.created_at.is_some());
    }

    #[test]
    fn intermediate_network_statuses_read_as_committed() {
        for s in ["\"COMMITTING\"", "\"REVEALING\"", "\"COMMITTED\""] {
            let status: TransactionStatus = serde_json::from_str(s).unwrap();
            assert_eq!(status, TransactionStatus::Committed);
        }
    }

    #[test]
    fn receipt_without_consensus_data_has_no_execution_result() {
        let receipt: TransactionReceipt =
            serde_json::from_value(json!({ "hash": "0x1", "status": "PROPOSING" })).unwrap();
        assert_eq!(receipt.execution_result(), None);
        assert!(!receipt.succeeded());
        assert!(receipt.triggered_transaction_hashes.is_empty());
    }
}
