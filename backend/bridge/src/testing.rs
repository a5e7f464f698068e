//! In-memory chain double for orchestrator and poller tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::ChainError;
use crate::rpc::{CallPayload, ChainClient, StateQuery};
use crate::signer::SigningIdentity;
use crate::status::{
    ConsensusData, ExecutionResult, LeaderReceipt, TransactionReceipt, TransactionStatus,
};

/// Replays queued receipts per hash. Once a queue drains, the last receipt
/// handed out keeps being returned; hashes never scripted read as PENDING.
#[derive(Default)]
pub struct ScriptedChain {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    receipts: HashMap<String, VecDeque<Result<TransactionReceipt, ChainError>>>,
    sticky: HashMap<String, TransactionReceipt>,
    reads: HashMap<String, usize>,
    submit_results: VecDeque<Result<String, ChainError>>,
    submissions: Vec<(CallPayload, String)>,
    state: HashMap<(String, String), Value>,
}

impl ScriptedChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_receipt(&self, hash: &str, receipt: TransactionReceipt) {
        self.lock()
            .receipts
            .entry(hash.to_string())
            .or_default()
            .push_back(Ok(receipt));
    }

    pub fn push_read_error(&self, hash: &str, err: ChainError) {
        self.lock()
            .receipts
            .entry(hash.to_string())
            .or_default()
            .push_back(Err(err));
    }

    /// Queue the result of the next `submit_call`. Unqueued submissions get
    /// `0xtx<n>` hashes.
    pub fn push_submit(&self, result: Result<&str, ChainError>) {
        self.lock()
            .submit_results
            .push_back(result.map(String::from));
    }

    pub fn set_state(&self, address: &str, function: &str, value: Value) {
        self.lock()
            .state
            .insert((address.to_string(), function.to_string()), value);
    }

    pub fn reads(&self, hash: &str) -> usize {
        self.lock().reads.get(hash).copied().unwrap_or(0)
    }

    pub fn submissions(&self) -> Vec<CallPayload> {
        self.lock()
            .submissions
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn submitters(&self) -> Vec<String> {
        self.lock()
            .submissions
            .iter()
            .map(|(_, from)| from.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn submit_call(
        &self,
        payload: &CallPayload,
        signer: &dyn SigningIdentity,
    ) -> Result<String, ChainError> {
        let mut inner = self.lock();
        inner
            .submissions
            .push((payload.clone(), signer.address().to_string()));
        let n = inner.submissions.len();
        inner
            .submit_results
            .pop_front()
            .unwrap_or_else(|| Ok(format!("0xtx{n}")))
    }

    async fn get_receipt(&self, hash: &str) -> Result<TransactionReceipt, ChainError> {
        let mut inner = self.lock();
        *inner.reads.entry(hash.to_string()).or_default() += 1;
        let next = inner.receipts.get_mut(hash).and_then(|q| q.pop_front());
        match next {
            Some(Ok(receipt)) => {
                inner.sticky.insert(hash.to_string(), receipt.clone());
                Ok(receipt)
            }
            Some(Err(e)) => Err(e),
            None => Ok(inner
                .sticky
                .get(hash)
                .cloned()
                .unwrap_or_else(|| TransactionReceipt::pending(hash))),
        }
    }

    async fn read_state(&self, address: &str, query: &StateQuery) -> Result<Value, ChainError> {
        self.lock()
            .state
            .get(&(address.to_string(), query.function.clone()))
            .cloned()
            .ok_or_else(|| ChainError::Rejected {
                code: -32000,
                message: format!("no state for {address}.{}", query.function),
            })
    }
}

/// Fixed-address signer.
pub struct TestSigner(pub &'static str);

impl SigningIdentity for TestSigner {
    fn address(&self) -> &str {
        self.0
    }

    fn sign(&self, _message: &[u8]) -> Result<Vec<u8>, crate::errors::SigningError> {
        Ok(vec![0; 65])
    }
}

/// A receipt with no consensus data yet.
pub fn receipt(hash: &str, status: TransactionStatus) -> TransactionReceipt {
    TransactionReceipt {
        status,
        ..TransactionReceipt::pending(hash)
    }
}

/// A receipt whose leader execution finished with `result`.
pub fn executed(
    hash: &str,
    status: TransactionStatus,
    result: ExecutionResult,
    result_data: Value,
) -> TransactionReceipt {
    TransactionReceipt {
        consensus_data: Some(ConsensusData {
            leader_receipt: Some(LeaderReceipt {
                execution_result: result,
                result_data,
            }),
        }),
        ..receipt(hash, status)
    }
}

/// A successful deploy receipt carrying the new contract's address.
pub fn deployed(hash: &str, status: TransactionStatus, address: &str) -> TransactionReceipt {
    TransactionReceipt {
        output_data: json!({ "contract_address": address }),
        ..executed(hash, status, ExecutionResult::Success, Value::Null)
    }
}

pub fn with_triggered(mut receipt: TransactionReceipt, triggered: &[&str]) -> TransactionReceipt {
    receipt.triggered_transaction_hashes = triggered.iter().map(|h| h.to_string()).collect();
    receipt
}
