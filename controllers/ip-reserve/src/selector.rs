//! Selector gate
//!
//! Decides whether a removed pod is worth reserving an address for. Unlike a
//! Kubernetes label selector, the requirements are OR-ed: one matching
//! requirement is enough, so a pod opts in by carrying any one of several
//! identity labels.

use crate::error::ControllerError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl std::str::FromStr for Operator {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "In" => Ok(Operator::In),
            "NotIn" => Ok(Operator::NotIn),
            "Exists" => Ok(Operator::Exists),
            "DoesNotExist" => Ok(Operator::DoesNotExist),
            other => Err(ControllerError::InvalidConfig(format!(
                "unsupported label selector operator {other:?}"
            ))),
        }
    }
}

/// One label-match requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: BTreeSet<String>,
}

impl Requirement {
    pub fn new(
        key: impl Into<String>,
        operator: Operator,
        values: impl IntoIterator<Item = String>,
    ) -> Result<Self, ControllerError> {
        let key = key.into();
        let values: BTreeSet<String> = values.into_iter().collect();
        if key.is_empty() {
            return Err(ControllerError::InvalidConfig("label selector key must not be empty".to_string()));
        }
        match operator {
            Operator::In | Operator::NotIn if values.is_empty() => Err(ControllerError::InvalidConfig(
                format!("label selector {key:?} needs at least one value for {operator:?}"),
            )),
            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                Err(ControllerError::InvalidConfig(format!(
                    "label selector {key:?} must not list values for {operator:?}"
                )))
            }
            _ => Ok(Self { key, operator, values }),
        }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

/// Requirements combined with OR semantics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorGate {
    requirements: Vec<Requirement>,
}

impl SelectorGate {
    /// Builds the gate from a Kubernetes selector, turning each `matchLabels`
    /// pair into an `In` requirement.
    pub fn from_label_selector(selector: &LabelSelector) -> Result<Self, ControllerError> {
        let mut requirements = Vec::new();
        for (key, value) in selector.match_labels.iter().flatten() {
            requirements.push(Requirement::new(key.clone(), Operator::In, [value.clone()])?);
        }
        for expression in selector.match_expressions.iter().flatten() {
            let operator = expression.operator.parse()?;
            requirements.push(Requirement::new(
                expression.key.clone(),
                operator,
                expression.values.clone().unwrap_or_default(),
            )?);
        }
        Ok(Self { requirements })
    }

    /// True iff at least one requirement matches. An empty gate matches nothing.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().any(|requirement| requirement.matches(labels))
    }
}
