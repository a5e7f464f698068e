//! Runs a [`DeploymentPlan`] end-to-end and reports one consolidated outcome.
//!
//! ```text
//! VALIDATING ──► SUBMITTING(0) ──► AWAITING(0) ──► EXTRACTING(0) ──► SUBMITTING(1) ──► … ──► DONE
//!      │               │                │                │
//!      └───────────────┴────────────────┴────────────────┴──► FAILED(i, cause)
//! ```
//!
//! A step whose completion is a triggered transaction passes through
//! `AWAITING_TRIGGERED(i)` between `AWAITING(i)` and `EXTRACTING(i)`.
//!
//! Each step is submitted at most once per run. Nothing is retried or
//! compensated here: if step `i` fails, steps `0..i` stay confirmed on-chain
//! and the outcome says so.

use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::{ChainError, PollError, StepError};
use crate::plan::{Completion, DeploymentPlan, PlanBuilder};
use crate::poller::{PollingPolicy, ReceiptPoller};
use crate::rpc::ChainClient;
use crate::signer::SigningIdentity;
use crate::status::{TransactionReceipt, TransactionStatus};

/// What one confirmed (or observed-and-failed) step left behind.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step: usize,
    pub name: String,
    pub transaction_hash: String,
    pub receipt: TransactionReceipt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_receipt: Option<TransactionReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Done {
        message: String,
        receipts: Vec<StepRecord>,
        output: Option<Value>,
    },
    Failed {
        message: String,
        /// `None` when the input never passed validation.
        failed_at_step: Option<usize>,
        error: StepError,
        receipts: Vec<StepRecord>,
    },
}

/// Stable error tag for callers that branch on the failure class.
pub fn error_kind(error: &StepError) -> &'static str {
    let chain_kind = |e: &ChainError| match e {
        ChainError::Network(_) => "NetworkError",
        ChainError::Rejected { .. } => "RejectedError",
        ChainError::Malformed(_) => "ProtocolError",
        ChainError::Signing(_) => "SigningError",
    };
    match error {
        StepError::Validation(_) => "ValidationError",
        StepError::Submission(e) => chain_kind(e),
        StepError::Poll(PollError::TransactionFailed { .. }) | StepError::ExecutionFailed { .. } => {
            "TransactionFailedError"
        }
        StepError::Poll(PollError::Timeout { .. }) => "PollingTimeoutError",
        StepError::Poll(PollError::Cancelled { .. }) => "Cancelled",
        StepError::Poll(PollError::Chain { source, .. }) => chain_kind(source),
        StepError::MissingTriggeredTransaction { .. } | StepError::Extraction(_) => {
            "ExtractionError"
        }
        StepError::Plan(_) => "PlanError",
    }
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum OutcomeBody<'a> {
    Success {
        message: &'a str,
        receipts: &'a [StepRecord],
        output: &'a Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        message: &'a str,
        error_kind: &'static str,
        failed_at_step: Option<usize>,
        receipts: &'a [StepRecord],
        rolled_back: bool,
    },
}

impl Serialize for PlanOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let body = match self {
            PlanOutcome::Done {
                message,
                receipts,
                output,
            } => OutcomeBody::Success {
                message,
                receipts,
                output,
            },
            PlanOutcome::Failed {
                message,
                failed_at_step,
                error,
                receipts,
            } => OutcomeBody::Error {
                message,
                error_kind: error_kind(error),
                failed_at_step: *failed_at_step,
                receipts,
                rolled_back: false,
            },
        };
        body.serialize(serializer)
    }
}

enum Phase {
    Submitting {
        step: usize,
    },
    Awaiting {
        step: usize,
        hash: String,
    },
    AwaitingTriggered {
        step: usize,
        receipt: TransactionReceipt,
        triggered: String,
        status: TransactionStatus,
    },
    Extracting {
        step: usize,
        receipt: TransactionReceipt,
        triggered: Option<TransactionReceipt>,
    },
    Done,
    Failed {
        step: usize,
        error: StepError,
    },
}

/// Running tally of one plan execution.
#[derive(Default)]
struct Tally {
    records: Vec<StepRecord>,
    /// Output of the step just extracted; feeds the next step's template.
    previous: Option<Value>,
    /// Most recent output extracted by any step.
    last_output: Option<Value>,
}

pub struct DeploymentOrchestrator<C: ?Sized> {
    client: Arc<C>,
    poller: ReceiptPoller<C>,
    signer: Arc<dyn SigningIdentity>,
    policy: PollingPolicy,
}

impl<C: ChainClient + ?Sized> DeploymentOrchestrator<C> {
    pub fn new(client: Arc<C>, signer: Arc<dyn SigningIdentity>, policy: PollingPolicy) -> Self {
        Self {
            poller: ReceiptPoller::new(client.clone()),
            client,
            signer,
            policy,
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Validate `raw`, build the plan and execute it.
    pub async fn run_plan(
        &self,
        builder: &dyn PlanBuilder,
        raw: &Value,
        cancel: &CancellationToken,
    ) -> PlanOutcome {
        let plan = match builder
            .intake()
            .validate(raw)
            .and_then(|()| builder.build(raw))
        {
            Ok(plan) => plan,
            Err(e) => {
                info!(plan = builder.name(), "rejected input: {e}");
                return PlanOutcome::Failed {
                    message: e.to_string(),
                    failed_at_step: None,
                    error: e.into(),
                    receipts: Vec::new(),
                };
            }
        };
        self.execute(&plan, cancel).await
    }

    /// Execute an already-built plan.
    pub async fn execute(&self, plan: &DeploymentPlan, cancel: &CancellationToken) -> PlanOutcome {
        let mut tally = Tally::default();
        let mut phase = Phase::Submitting { step: 0 };

        loop {
            phase = match phase {
                Phase::Submitting { step } if step >= plan.steps.len() => Phase::Done,
                Phase::Submitting { step } => self.submit(plan, step, &tally).await,
                Phase::Awaiting { step, hash } => {
                    self.await_step(plan, step, hash, cancel, &mut tally)
                        .await
                }
                Phase::AwaitingTriggered {
                    step,
                    receipt,
                    triggered,
                    status,
                } => {
                    self.await_triggered(
                        plan,
                        step,
                        receipt,
                        triggered,
                        status,
                        cancel,
                        &mut tally,
                    )
                    .await
                }
                Phase::Extracting {
                    step,
                    receipt,
                    triggered,
                } => extract(plan, step, receipt, triggered, &mut tally),
                Phase::Done => {
                    info!(plan = %plan.name, steps = plan.steps.len(), "plan done");
                    return PlanOutcome::Done {
                        message: plan.success_message.clone(),
                        receipts: tally.records,
                        output: tally.last_output,
                    };
                }
                Phase::Failed { step, error } => {
                    warn!(plan = %plan.name, step, "plan failed: {error}");
                    return PlanOutcome::Failed {
                        message: failure_message(plan, step, &error),
                        failed_at_step: Some(step),
                        error,
                        receipts: tally.records,
                    };
                }
            };
        }
    }

    async fn submit(&self, plan: &DeploymentPlan, step: usize, tally: &Tally) -> Phase {
        let step_def = &plan.steps[step];
        let payload = match step_def.payload.resolve(tally.previous.as_ref()) {
            Ok(p) => p,
            Err(error) => return Phase::Failed { step, error },
        };

        match self.client.submit_call(&payload, self.signer.as_ref()).await {
            Ok(hash) => {
                info!(
                    plan = %plan.name,
                    step,
                    name = %step_def.name,
                    kind = ?step_def.kind(),
                    hash = %hash,
                    "submitted"
                );
                Phase::Awaiting { step, hash }
            }
            Err(e) => Phase::Failed {
                step,
                error: StepError::Submission(e),
            },
        }
    }

    async fn await_step(
        &self,
        plan: &DeploymentPlan,
        step: usize,
        hash: String,
        cancel: &CancellationToken,
        tally: &mut Tally,
    ) -> Phase {
        let step_def = &plan.steps[step];
        let policy = step_def.policy.unwrap_or(self.policy);

        let receipt = match self
            .poller
            .await_status(&hash, step_def.required_status, &policy, cancel)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                if let Some(observed) = observed_failure(&e) {
                    tally.records.push(record(plan, step, observed, None, None));
                }
                return Phase::Failed { step, error: e.into() };
            }
        };
        info!(plan = %plan.name, step, hash = %hash, status = %receipt.status, "confirmed");

        if let Err(error) = ensure_executed(&receipt) {
            tally.records.push(record(plan, step, receipt, None, None));
            return Phase::Failed { step, error };
        }

        match step_def.completion {
            Completion::Submitted => Phase::Extracting {
                step,
                receipt,
                triggered: None,
            },
            Completion::FirstTriggered { status } => {
                match receipt.triggered_transaction_hashes.first().cloned() {
                    Some(triggered) => Phase::AwaitingTriggered {
                        step,
                        receipt,
                        triggered,
                        status,
                    },
                    None => {
                        tally.records.push(record(plan, step, receipt, None, None));
                        Phase::Failed {
                            step,
                            error: StepError::MissingTriggeredTransaction { hash },
                        }
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn await_triggered(
        &self,
        plan: &DeploymentPlan,
        step: usize,
        receipt: TransactionReceipt,
        triggered: String,
        status: TransactionStatus,
        cancel: &CancellationToken,
        tally: &mut Tally,
    ) -> Phase {
        let policy = plan.steps[step].policy.unwrap_or(self.policy);
        info!(plan = %plan.name, step, triggered = %triggered, "awaiting triggered transaction");

        match self
            .poller
            .await_status(&triggered, status, &policy, cancel)
            .await
        {
            Ok(triggered_receipt) => {
                if let Err(error) = ensure_executed(&triggered_receipt) {
                    tally
                        .records
                        .push(record(plan, step, receipt, Some(triggered_receipt), None));
                    return Phase::Failed { step, error };
                }
                Phase::Extracting {
                    step,
                    receipt,
                    triggered: Some(triggered_receipt),
                }
            }
            Err(e) => {
                let observed = observed_failure(&e);
                tally
                    .records
                    .push(record(plan, step, receipt, observed, None));
                Phase::Failed { step, error: e.into() }
            }
        }
    }
}

fn extract(
    plan: &DeploymentPlan,
    step: usize,
    receipt: TransactionReceipt,
    triggered: Option<TransactionReceipt>,
    tally: &mut Tally,
) -> Phase {
    let completed = triggered.as_ref().unwrap_or(&receipt);
    let output = match plan.steps[step].extractor {
        Some(extractor) => match extractor.extract(completed) {
            Ok(v) => Some(v),
            Err(e) => {
                tally
                    .records
                    .push(record(plan, step, receipt, triggered, None));
                return Phase::Failed { step, error: e.into() };
            }
        },
        None => None,
    };

    if let Some(v) = &output {
        info!(plan = %plan.name, step, output = %v, "extracted output");
        tally.last_output = Some(v.clone());
    }
    tally.previous = output.clone();
    tally
        .records
        .push(record(plan, step, receipt, triggered, output));
    Phase::Submitting { step: step + 1 }
}

/// The extractor only ever sees receipts whose leader execution succeeded.
fn ensure_executed(receipt: &TransactionReceipt) -> Result<(), StepError> {
    if receipt.succeeded() {
        Ok(())
    } else {
        Err(StepError::ExecutionFailed {
            hash: receipt.transaction_hash.clone(),
            status: receipt.status,
            execution_result: receipt.execution_result(),
        })
    }
}

/// The receipt a poll failure was decided on, if one was read.
fn observed_failure(error: &PollError) -> Option<TransactionReceipt> {
    match error {
        PollError::TransactionFailed { receipt, .. } => Some(receipt.as_ref().clone()),
        _ => None,
    }
}

fn record(
    plan: &DeploymentPlan,
    step: usize,
    receipt: TransactionReceipt,
    triggered_receipt: Option<TransactionReceipt>,
    output: Option<Value>,
) -> StepRecord {
    StepRecord {
        step,
        name: plan.steps[step].name.clone(),
        transaction_hash: receipt.transaction_hash.clone(),
        receipt,
        triggered_receipt,
        output,
    }
}

fn failure_message(plan: &DeploymentPlan, step: usize, error: &StepError) -> String {
    let mut message = format!(
        "{} failed at step {step} ({}): {error}",
        plan.name, plan.steps[step].name
    );
    if step > 0 {
        message.push_str(&format!(
            ". Steps 0..={} are confirmed on-chain and were not rolled back",
            step - 1
        ));
    }
    message
}
