//! Value coercion.
//!
//! # Responsibilities
//! - Turn a raw store/environment string (or its absence) into a typed [`Value`]
//! - Apply per-name defaults when the raw value is absent or malformed
//! - Reject values outside a declared range
//!
//! # Design Decisions
//! - Coercion is a plain trait object, not a type hierarchy per application
//! - Any `Fn(&str, Option<&str>) -> Result<Value, CoercionError>` is a coercer
//! - Names without a rule pass through unchanged

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Tokens accepted as `true` by boolean rules (compared trimmed and lowercased).
pub const TRUTHY_TOKENS: &[&str] = &["1", "true", "yes", "y", "on"];

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::List(items) => write!(f, "{}", items.join(",")),
        }
    }
}

/// Errors raised when a raw value cannot be accepted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoercionError {
    /// Parsed fine but falls outside the allowed range.
    #[error("{name}: value {value} outside allowed range [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: String,
        min: String,
        max: String,
    },

    /// The raw value could not be interpreted at all.
    #[error("{name}: malformed value '{value}': {reason}")]
    Malformed {
        name: String,
        value: String,
        reason: String,
    },
}

/// Converts raw values into typed values for a logical name.
pub trait Coerce: Send + Sync {
    fn coerce(&self, name: &str, raw: Option<&str>) -> Result<Value, CoercionError>;
}

impl<F> Coerce for F
where
    F: Fn(&str, Option<&str>) -> Result<Value, CoercionError> + Send + Sync,
{
    fn coerce(&self, name: &str, raw: Option<&str>) -> Result<Value, CoercionError> {
        self(name, raw)
    }
}

/// Identity coercion: strings stay strings, absence becomes [`Value::Null`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Coerce for Passthrough {
    fn coerce(&self, _name: &str, raw: Option<&str>) -> Result<Value, CoercionError> {
        Ok(raw.map_or(Value::Null, |s| Value::Text(s.to_string())))
    }
}

/// A single coercion rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Keep the string, substituting `default` when absent.
    Text { default: Option<String> },
    /// Truthy-token boolean; any other string is `false`.
    Bool { default: bool },
    /// Integer with fallback on parse failure and optional bounds.
    Int {
        default: i64,
        min: Option<i64>,
        max: Option<i64>,
    },
    /// Float with fallback on parse failure and optional bounds.
    Float {
        default: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Comma-separated list, trimmed, empty items dropped.
    List,
}

impl Rule {
    pub fn text() -> Self {
        Rule::Text { default: None }
    }

    pub fn bool() -> Self {
        Rule::Bool { default: false }
    }

    pub fn int(default: i64) -> Self {
        Rule::Int {
            default,
            min: None,
            max: None,
        }
    }

    pub fn int_in(default: i64, min: i64, max: i64) -> Self {
        Rule::Int {
            default,
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn float(default: f64) -> Self {
        Rule::Float {
            default,
            min: None,
            max: None,
        }
    }

    pub fn float_in(default: f64, min: f64, max: f64) -> Self {
        Rule::Float {
            default,
            min: Some(min),
            max: Some(max),
        }
    }

    /// Apply the rule to a raw value.
    pub fn apply(&self, name: &str, raw: Option<&str>) -> Result<Value, CoercionError> {
        match self {
            Rule::Text { default } => Ok(raw
                .map(str::to_string)
                .or_else(|| default.clone())
                .map_or(Value::Null, Value::Text)),
            Rule::Bool { default } => Ok(Value::Bool(match raw {
                Some(s) => is_truthy(s),
                None => *default,
            })),
            Rule::Int { default, min, max } => {
                let Some(parsed) = raw.and_then(|s| s.trim().parse::<i64>().ok()) else {
                    return Ok(Value::Int(*default));
                };
                let below = min.is_some_and(|m| parsed < m);
                let above = max.is_some_and(|m| parsed > m);
                if below || above {
                    return Err(out_of_range(name, parsed, *min, *max));
                }
                Ok(Value::Int(parsed))
            }
            Rule::Float { default, min, max } => {
                let Some(parsed) = raw.and_then(|s| s.trim().parse::<f64>().ok()) else {
                    return Ok(Value::Float(*default));
                };
                if !parsed.is_finite() {
                    return Err(CoercionError::Malformed {
                        name: name.to_string(),
                        value: raw.unwrap_or_default().to_string(),
                        reason: "not a finite number".to_string(),
                    });
                }
                let below = min.is_some_and(|m| parsed < m);
                let above = max.is_some_and(|m| parsed > m);
                if below || above {
                    return Err(out_of_range(name, parsed, *min, *max));
                }
                Ok(Value::Float(parsed))
            }
            Rule::List => Ok(Value::List(
                raw.map(split_list).unwrap_or_default(),
            )),
        }
    }
}

fn out_of_range<T: fmt::Display>(
    name: &str,
    value: T,
    min: Option<T>,
    max: Option<T>,
) -> CoercionError {
    let bound = |b: Option<T>, open: &str| b.map_or_else(|| open.to_string(), |b| b.to_string());
    CoercionError::OutOfRange {
        name: name.to_string(),
        value: value.to_string(),
        min: bound(min, "-inf"),
        max: bound(max, "+inf"),
    }
}

/// Whether `raw` is one of the [`TRUTHY_TOKENS`].
pub fn is_truthy(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    TRUTHY_TOKENS.contains(&lowered.as_str())
}

/// Split a comma-separated list, trimming items and dropping empties.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Per-name rule table with passthrough for unlisted names.
#[derive(Debug, Clone, Default)]
pub struct CoercionTable {
    rules: HashMap<String, Rule>,
}

impl CoercionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `rule` for `name`, replacing any earlier rule.
    pub fn with(mut self, name: impl Into<String>, rule: Rule) -> Self {
        self.rules.insert(name.into(), rule);
        self
    }

    /// Register the same rule for several names.
    pub fn with_all<I, S>(mut self, names: I, rule: Rule) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.rules.insert(name.into(), rule.clone());
        }
        self
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }
}

impl Coerce for CoercionTable {
    fn coerce(&self, name: &str, raw: Option<&str>) -> Result<Value, CoercionError> {
        match self.rules.get(name) {
            Some(rule) => rule.apply(name, raw),
            None => Passthrough.coerce(name, raw),
        }
    }
}
