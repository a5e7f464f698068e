//! Deployment plans: ordered, dependent submit-and-confirm steps.
//!
//! A step's payload is a template. Any [`Arg::PreviousOutput`] or
//! [`Target::PreviousOutput`] slot is filled with the value extracted from
//! the step before it, so a plan can deploy a contract and hand the new
//! address to a registry call without the caller stitching them together.

use serde::Serialize;
use serde_json::Value;

use crate::errors::{ExtractionError, StepError, ValidationError};
use crate::poller::PollingPolicy;
use crate::rpc::CallPayload;
use crate::status::{TransactionReceipt, TransactionStatus};
use crate::validation::IntakeRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Deploy,
    Call,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Literal(Value),
    PreviousOutput,
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Literal(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Address(String),
    PreviousOutput,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PayloadTemplate {
    Deploy {
        code: Vec<u8>,
        args: Vec<Arg>,
    },
    Call {
        target: Target,
        function: String,
        args: Vec<Arg>,
    },
}

impl PayloadTemplate {
    pub fn kind(&self) -> StepKind {
        match self {
            PayloadTemplate::Deploy { .. } => StepKind::Deploy,
            PayloadTemplate::Call { .. } => StepKind::Call,
        }
    }

    /// Fill every previous-output slot with `previous`.
    pub fn resolve(&self, previous: Option<&Value>) -> Result<CallPayload, StepError> {
        let fill = |arg: &Arg| match arg {
            Arg::Literal(v) => Ok(v.clone()),
            Arg::PreviousOutput => previous.cloned().ok_or_else(no_previous_output),
        };

        Ok(match self {
            PayloadTemplate::Deploy { code, args } => CallPayload::Deploy {
                code: code.clone(),
                args: args.iter().map(fill).collect::<Result<_, _>>()?,
            },
            PayloadTemplate::Call {
                target,
                function,
                args,
            } => CallPayload::Call {
                address: match target {
                    Target::Address(a) => a.clone(),
                    Target::PreviousOutput => previous
                        .and_then(Value::as_str)
                        .map(String::from)
                        .ok_or_else(no_previous_output)?,
                },
                function: function.clone(),
                args: args.iter().map(fill).collect::<Result<_, _>>()?,
            },
        })
    }
}

fn no_previous_output() -> StepError {
    StepError::Plan("step references the previous step's output, but there is none".into())
}

/// Which transaction marks the step as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The submitted transaction itself.
    Submitted,
    /// The first transaction the submitted one triggered, awaited to `status`.
    FirstTriggered { status: TransactionStatus },
}

/// Pulls the value the next step needs out of a confirmed receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputExtractor {
    /// Address of a contract created by the transaction.
    ContractAddress,
}

impl OutputExtractor {
    pub fn extract(&self, receipt: &TransactionReceipt) -> Result<Value, ExtractionError> {
        match self {
            OutputExtractor::ContractAddress => {
                let leader_data = receipt.leader_receipt().map(|r| &r.result_data);
                let candidates = [
                    receipt.output_data.get("contract_address"),
                    leader_data.and_then(|d| d.get("contract_address")),
                    leader_data.and_then(|d| d.get("address")),
                ];
                candidates
                    .into_iter()
                    .flatten()
                    .find_map(|v| v.as_str().filter(|s| !s.is_empty()))
                    .map(|s| Value::String(s.to_string()))
                    .ok_or_else(|| ExtractionError::MissingField {
                        hash: receipt.transaction_hash.clone(),
                        field: "contract_address",
                    })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeploymentStep {
    pub name: String,
    pub payload: PayloadTemplate,
    pub required_status: TransactionStatus,
    pub completion: Completion,
    /// `None` for a terminal step whose output nobody consumes.
    pub extractor: Option<OutputExtractor>,
    /// Overrides the orchestrator's default policy for this step.
    pub policy: Option<PollingPolicy>,
}

impl DeploymentStep {
    pub fn kind(&self) -> StepKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub name: String,
    pub success_message: String,
    pub steps: Vec<DeploymentStep>,
}

/// Turns a raw intake document into a concrete plan.
pub trait PlanBuilder: Send + Sync {
    fn name(&self) -> &str;

    /// Presence rules checked before [`PlanBuilder::build`] is called.
    fn intake(&self) -> &IntakeRules;

    /// Only called on input that passed [`PlanBuilder::intake`].
    fn build(&self, raw: &Value) -> Result<DeploymentPlan, ValidationError>;
}
