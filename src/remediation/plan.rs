//! Remediation plans and action descriptors
//!
//! Steps and strategies are written as compact descriptors:
//! `type:key=value;key=value`. A bare `type` has no parameters.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::context::ErrorSeverity;
use crate::errors::ValidationError;

/// Parsed form of a `type:key=value;...` descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub action_type: String,
    pub parameters: BTreeMap<String, String>,
}

impl ActionDescriptor {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_string(), value.to_string());
        self
    }

    pub fn parse(descriptor: &str) -> Result<Self, ValidationError> {
        let malformed = |reason: &str| ValidationError::MalformedDescriptor {
            descriptor: descriptor.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = descriptor.trim();
        let (type_part, params_part) = match trimmed.split_once(':') {
            Some((t, p)) => (t.trim(), p),
            None => (trimmed, ""),
        };

        if type_part.is_empty() {
            return Err(malformed("missing type"));
        }
        if !type_part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(malformed("type may only contain letters, digits, '_' and '-'"));
        }

        let mut parameters = BTreeMap::new();
        for segment in params_part.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| malformed(&format!("parameter '{}' has no '='", segment)))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(malformed("parameter with empty name"));
            }
            parameters.insert(key.to_string(), value.trim().to_string());
        }

        Ok(Self {
            action_type: type_part.to_ascii_lowercase(),
            parameters,
        })
    }

    /// Value of `key` if present and non-empty.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

impl std::fmt::Display for ActionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.action_type)?;
        if !self.parameters.is_empty() {
            let params: Vec<String> = self
                .parameters
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, ":{}", params.join(";"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationStep {
    pub description: String,
    /// Action descriptor, e.g. `restart:target=payments`
    pub action: String,
    /// Extra parameters merged under the descriptor's own
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub max_retries: u32,
}

impl RemediationStep {
    pub fn new(description: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            action: action.into(),
            parameters: HashMap::new(),
            max_retries: 0,
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_string(), value.to_string());
        self
    }

    /// Parse the action and fold in `parameters`; descriptor values win.
    pub fn descriptor(&self) -> Result<ActionDescriptor, ValidationError> {
        let mut descriptor = ActionDescriptor::parse(&self.action)?;
        for (k, v) in &self.parameters {
            descriptor
                .parameters
                .entry(k.clone())
                .or_insert_with(|| v.clone());
        }
        Ok(descriptor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationPlan {
    #[serde(default = "new_plan_id")]
    pub id: String,
    #[serde(default)]
    pub steps: Vec<RemediationStep>,
    /// Strategy descriptors, e.g. `circuit_breaker:target=payments`
    #[serde(default)]
    pub strategies: Vec<String>,
    #[serde(default)]
    pub context: String,
    /// Error types this plan is meant for; empty means any
    #[serde(default)]
    pub applicable_error_types: Vec<String>,
    #[serde(default)]
    pub min_severity: Option<ErrorSeverity>,
    #[serde(default)]
    pub max_severity: Option<ErrorSeverity>,
    #[serde(default, skip_deserializing)]
    is_validated: bool,
}

fn new_plan_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Default for RemediationPlan {
    fn default() -> Self {
        Self::new("")
    }
}

impl RemediationPlan {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            id: new_plan_id(),
            steps: Vec::new(),
            strategies: Vec::new(),
            context: context.into(),
            applicable_error_types: Vec::new(),
            min_severity: None,
            max_severity: None,
            is_validated: false,
        }
    }

    pub fn with_step(mut self, step: RemediationStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_strategy(mut self, descriptor: impl Into<String>) -> Self {
        self.strategies.push(descriptor.into());
        self
    }

    pub fn for_error_types(mut self, types: &[&str]) -> Self {
        self.applicable_error_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_severity_range(
        mut self,
        min: Option<ErrorSeverity>,
        max: Option<ErrorSeverity>,
    ) -> Self {
        self.min_severity = min;
        self.max_severity = max;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.strategies.is_empty()
    }

    pub fn is_validated(&self) -> bool {
        self.is_validated
    }

    pub(crate) fn mark_validated(&mut self) {
        self.is_validated = true;
    }
}
