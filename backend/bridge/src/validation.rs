//! Intake validation. Runs before anything touches the network.

use serde_json::Value;

use crate::errors::ValidationError;

/// Presence rules for a raw JSON intake object.
#[derive(Debug, Clone, Copy)]
pub struct IntakeRules {
    /// Checked in this order; the first offender is reported.
    pub required: &'static [&'static str],
    /// At least one of these two sequences must be non-empty.
    pub sourcing: (&'static str, &'static str),
}

/// Rules for an intelligent-oracle deployment request.
pub const ORACLE_INTAKE: IntakeRules = IntakeRules {
    required: &[
        "title",
        "description",
        "potentialOutcomes",
        "rules",
        "earliestResolutionDate",
    ],
    sourcing: ("resolutionURLs", "dataSourceDomains"),
};

impl IntakeRules {
    pub fn validate(&self, raw: &Value) -> Result<(), ValidationError> {
        for &field in self.required {
            if is_blank(raw.get(field)) {
                return Err(ValidationError::MissingField(field));
            }
        }

        let (a, b) = self.sourcing;
        if is_blank(raw.get(a)) && is_blank(raw.get(b)) {
            return Err(ValidationError::MissingSourcing);
        }

        Ok(())
    }
}

/// Absent, null, empty string and empty array all count as missing.
fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}
