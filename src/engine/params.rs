// src/engine/params.rs

//! Parameter resolution: merge request values with the target's declared
//! schema and validate them.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TriggerError};

/// A typed parameter value as supplied by a request or declared as default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    String(String),
}

impl ParamValue {
    pub fn as_text(&self) -> String {
        match self {
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::String(s) => s.clone(),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// One named parameter value, either requested or resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterValue {
    pub name: String,
    pub value: ParamValue,
    /// Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterValue {
    pub fn new(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Declared type of a target parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterKind {
    String,
    Boolean,
    Choice { choices: Vec<String> },
}

/// One entry of a target job's parameter schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDefinition {
    pub name: String,
    pub kind: ParameterKind,
    pub default: Option<ParamValue>,
    pub description: Option<String>,
}

impl ParameterDefinition {
    pub fn string(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::String,
            default: Some(ParamValue::String(default.into())),
            description: None,
        }
    }

    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Boolean,
            default: Some(ParamValue::Bool(default)),
            description: None,
        }
    }

    pub fn choice<I, S>(name: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: ParameterKind::Choice {
                choices: choices.into_iter().map(Into::into).collect(),
            },
            default: None,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Value used when the request omits this parameter.
    pub fn default_value(&self) -> ParamValue {
        if let Some(ref value) = self.default {
            return value.clone();
        }
        match self.kind {
            ParameterKind::String => ParamValue::String(String::new()),
            ParameterKind::Boolean => ParamValue::Bool(false),
            ParameterKind::Choice { ref choices } => {
                ParamValue::String(choices.first().cloned().unwrap_or_default())
            }
        }
    }

    /// Validate and normalise a supplied value against this definition.
    fn coerce(&self, value: &ParamValue) -> Result<ParamValue> {
        match (&self.kind, value) {
            (ParameterKind::String, ParamValue::String(s)) => Ok(ParamValue::String(s.clone())),
            (ParameterKind::Boolean, ParamValue::Bool(b)) => Ok(ParamValue::Bool(*b)),
            (ParameterKind::Boolean, ParamValue::String(s)) => {
                match s.trim().to_lowercase().as_str() {
                    "true" => Ok(ParamValue::Bool(true)),
                    "false" => Ok(ParamValue::Bool(false)),
                    _ => Err(self.mismatch("boolean", value)),
                }
            }
            (ParameterKind::Choice { choices }, ParamValue::String(s)) => {
                if choices.iter().any(|c| c == s) {
                    Ok(ParamValue::String(s.clone()))
                } else {
                    let mut sorted = choices.clone();
                    sorted.sort();
                    Err(TriggerError::InvalidChoice {
                        name: self.name.clone(),
                        value: s.clone(),
                        choices: sorted,
                    })
                }
            }
            (ParameterKind::String, ParamValue::Bool(_)) => Err(self.mismatch("string", value)),
            (ParameterKind::Choice { .. }, ParamValue::Bool(_)) => {
                Err(self.mismatch("choice", value))
            }
        }
    }

    fn mismatch(&self, expected: &'static str, value: &ParamValue) -> TriggerError {
        TriggerError::TypeMismatch {
            name: self.name.clone(),
            expected,
            value: value.as_text(),
        }
    }
}

/// Resolve the request's parameters against `schema`.
///
/// The result lists every declared parameter exactly once, in declaration
/// order, taking the requested value when present and the default
/// otherwise. Descriptions come from the definition when it has one.
pub fn resolve_parameters(
    job: &str,
    schema: &[ParameterDefinition],
    requested: &[ParameterValue],
) -> Result<Vec<ParameterValue>> {
    let mut seen = HashSet::new();
    for param in requested {
        if !seen.insert(param.name.as_str()) {
            return Err(TriggerError::DuplicateParameter(param.name.clone()));
        }
        if !schema.iter().any(|def| def.name == param.name) {
            return Err(TriggerError::UnknownParameter {
                job: job.to_string(),
                name: param.name.clone(),
            });
        }
    }

    let mut resolved = Vec::with_capacity(schema.len());
    for def in schema {
        let supplied = requested.iter().find(|p| p.name == def.name);
        let value = match supplied {
            Some(param) => def.coerce(&param.value)?,
            None => def.default_value(),
        };
        let description = def
            .description
            .clone()
            .or_else(|| supplied.and_then(|p| p.description.clone()));

        resolved.push(ParameterValue {
            name: def.name.clone(),
            value,
            description,
        });
    }

    Ok(resolved)
}
