//! Intelligent-oracle deployment requests and the plans that fulfil them.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::ValidationError;
use crate::plan::{
    Arg, Completion, DeploymentPlan, DeploymentStep, OutputExtractor, PayloadTemplate,
    PlanBuilder, Target,
};
use crate::poller::PollingPolicy;
use crate::status::TransactionStatus;
use crate::validation::{IntakeRules, ORACLE_INTAKE};

/// Intake document posted by a prediction market.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleRequest {
    #[serde(default)]
    pub prediction_market_id: Option<String>,
    pub title: String,
    pub description: String,
    pub potential_outcomes: Vec<String>,
    pub rules: Vec<String>,
    #[serde(default)]
    pub data_source_domains: Vec<String>,
    #[serde(default, rename = "resolutionURLs")]
    pub resolution_urls: Vec<String>,
    pub earliest_resolution_date: String,
}

impl OracleRequest {
    pub fn from_raw(raw: &Value) -> Result<Self, ValidationError> {
        serde_json::from_value(raw.clone()).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Oracle constructor arguments, in the order the contract declares them.
    pub fn constructor_args(&self) -> Vec<Arg> {
        let market_id = self
            .prediction_market_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| "0".to_string());

        [
            json!(market_id),
            json!(self.title),
            json!(self.description),
            json!(self.potential_outcomes),
            json!(self.rules),
            json!(self.data_source_domains),
            json!(self.resolution_urls),
            json!(self.earliest_resolution_date),
        ]
        .into_iter()
        .map(Arg::Literal)
        .collect()
    }
}

/// The registry deploys the oracle itself (`create_new_prediction_market`).
/// The call is done once the deployment it triggers is accepted.
pub struct RegisterViaFactory {
    pub registry: String,
}

impl PlanBuilder for RegisterViaFactory {
    fn name(&self) -> &str {
        "register-via-factory"
    }

    fn intake(&self) -> &IntakeRules {
        &ORACLE_INTAKE
    }

    fn build(&self, raw: &Value) -> Result<DeploymentPlan, ValidationError> {
        let request = OracleRequest::from_raw(raw)?;
        Ok(DeploymentPlan {
            name: self.name().to_string(),
            success_message: "Intelligent Oracle deployed successfully".to_string(),
            steps: vec![DeploymentStep {
                name: "create_new_prediction_market".to_string(),
                payload: PayloadTemplate::Call {
                    target: Target::Address(self.registry.clone()),
                    function: "create_new_prediction_market".to_string(),
                    args: request.constructor_args(),
                },
                required_status: TransactionStatus::Finalized,
                completion: Completion::FirstTriggered {
                    status: TransactionStatus::Accepted,
                },
                extractor: Some(OutputExtractor::ContractAddress),
                policy: None,
            }],
        })
    }
}

/// Deploy the oracle contract directly, then record its address in the registry.
pub struct DeployThenRegister {
    pub registry: String,
    pub oracle_code: Vec<u8>,
}

impl PlanBuilder for DeployThenRegister {
    fn name(&self) -> &str {
        "deploy-then-register"
    }

    fn intake(&self) -> &IntakeRules {
        &ORACLE_INTAKE
    }

    fn build(&self, raw: &Value) -> Result<DeploymentPlan, ValidationError> {
        let request = OracleRequest::from_raw(raw)?;
        Ok(DeploymentPlan {
            name: self.name().to_string(),
            success_message: "Intelligent Oracle deployed and registered successfully"
                .to_string(),
            steps: vec![
                DeploymentStep {
                    name: "deploy_oracle".to_string(),
                    payload: PayloadTemplate::Deploy {
                        code: self.oracle_code.clone(),
                        args: request.constructor_args(),
                    },
                    required_status: TransactionStatus::Accepted,
                    completion: Completion::Submitted,
                    extractor: Some(OutputExtractor::ContractAddress),
                    policy: None,
                },
                DeploymentStep {
                    name: "register_contract".to_string(),
                    payload: PayloadTemplate::Call {
                        target: Target::Address(self.registry.clone()),
                        function: "register_contract".to_string(),
                        args: vec![Arg::PreviousOutput],
                    },
                    required_status: TransactionStatus::Finalized,
                    completion: Completion::Submitted,
                    extractor: None,
                    policy: None,
                },
            ],
        })
    }
}

/// One-off deployment of the oracle factory contract, with no constructor
/// arguments. Factory code is large, so it gets a longer attempt budget.
pub fn factory_deployment(code: Vec<u8>, policy: PollingPolicy) -> DeploymentPlan {
    DeploymentPlan {
        name: "factory-deployment".to_string(),
        success_message: "Contract deployed successfully".to_string(),
        steps: vec![DeploymentStep {
            name: "deploy_factory".to_string(),
            payload: PayloadTemplate::Deploy {
                code,
                args: Vec::new(),
            },
            required_status: TransactionStatus::Accepted,
            completion: Completion::Submitted,
            extractor: Some(OutputExtractor::ContractAddress),
            policy: Some(policy.with_max_attempts(200)),
        }],
    }
}
