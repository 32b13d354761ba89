//! Provider data model and RPC contract.
//!
//! A provider is an external process exposing vehicle telemetry. Every
//! provider is reached through the [`CarStatsProvider`] trait and pushes
//! measurements back through a [`ProviderCallback`] it was handed at
//! registration.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Stable key identifying one provider: package plus component class.
///
/// Rendered as `package/class`, the same short form used in logs, JSON and
/// configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderIdentity {
    package: String,
    class: String,
}

impl ProviderIdentity {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }

    /// Fixed tag attached to events produced by the pull path rather than by
    /// a single provider.
    pub fn merged() -> Self {
        Self::new("carstats", "merged")
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn class(&self) -> &str {
        &self.class
    }
}

impl std::fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

impl FromStr for ProviderIdentity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((package, class)) if !package.is_empty() && !class.is_empty() => {
                Ok(Self::new(package.trim(), class.trim()))
            }
            _ => Err(format!(
                "invalid provider identity '{s}' (expected package/class)"
            )),
        }
    }
}

impl TryFrom<String> for ProviderIdentity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProviderIdentity> for String {
    fn from(value: ProviderIdentity) -> Self {
        value.to_string()
    }
}

/// Value type declared by a field schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Float,
    Integer,
    Boolean,
    String,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float => write!(f, "float"),
            Self::Integer => write!(f, "integer"),
            Self::Boolean => write!(f, "boolean"),
            Self::String => write!(f, "string"),
        }
    }
}

/// Per-field metadata published by a provider.
///
/// The aggregator never interprets it; it is carried through to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<f64>,
}

impl FieldSchema {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            description: None,
            unit: None,
            min: None,
            max: None,
            resolution: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// A single measured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:.2}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Field key to schema, as published by one provider.
pub type FieldSchemas = HashMap<String, FieldSchema>;

/// Field key to value.
pub type Measurements = HashMap<String, Value>;

/// Inbound push contract: what a provider calls on the aggregator.
pub trait ProviderCallback: Send + Sync {
    /// New values measured at `timestamp_millis` (Unix epoch).
    fn on_new_measurements(&self, timestamp_millis: u64, values: Measurements);

    /// The provider's field schema changed.
    fn on_schema_changed(&self);
}

/// RPC contract of one connected provider.
///
/// Every call may fail with a connectivity error at any time.
pub trait CarStatsProvider: Send + Sync {
    fn get_schema(&self) -> Result<FieldSchemas, ProviderError>;

    /// The provider's own current view of every field it measures.
    fn get_merged_measurements(&self) -> Result<Measurements, ProviderError>;

    fn register_listener(&self, callback: Arc<dyn ProviderCallback>)
    -> Result<(), ProviderError>;

    fn unregister_listener(
        &self,
        callback: &Arc<dyn ProviderCallback>,
    ) -> Result<(), ProviderError>;

    fn needs_permissions(&self) -> Result<bool, ProviderError> {
        Ok(false)
    }

    fn request_permissions(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
