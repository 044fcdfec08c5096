//! Patch operations

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::JsonPointer;

/// The kind of change a [`PatchOperation`] makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOperationKind {
    /// Set a field, or append to a list field
    Add,
    /// Remove a field, or remove matching values from a list field
    Remove,
    /// Set a field, replacing any existing value
    Replace,
    /// Add a number to a numeric field
    Increment,
}

impl fmt::Display for PatchOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Remove => write!(f, "remove"),
            Self::Replace => write!(f, "replace"),
            Self::Increment => write!(f, "increment"),
        }
    }
}

/// A single change applied by a patch request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    operation: PatchOperationKind,
    field: JsonPointer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
}

impl PatchOperation {
    /// `add` operation
    pub fn add(field: impl Into<JsonPointer>, value: Value) -> Self {
        Self::new(PatchOperationKind::Add, field, Some(value))
    }

    /// `remove` of a whole field
    pub fn remove(field: impl Into<JsonPointer>) -> Self {
        Self::new(PatchOperationKind::Remove, field, None)
    }

    /// `remove` of specific values from a field
    pub fn remove_value(field: impl Into<JsonPointer>, value: Value) -> Self {
        Self::new(PatchOperationKind::Remove, field, Some(value))
    }

    /// `replace` operation
    pub fn replace(field: impl Into<JsonPointer>, value: Value) -> Self {
        Self::new(PatchOperationKind::Replace, field, Some(value))
    }

    /// `increment` operation
    pub fn increment(field: impl Into<JsonPointer>, amount: Value) -> Self {
        Self::new(PatchOperationKind::Increment, field, Some(amount))
    }

    fn new(operation: PatchOperationKind, field: impl Into<JsonPointer>, value: Option<Value>) -> Self {
        Self {
            operation,
            field: field.into(),
            value,
        }
    }

    /// Kind of change
    pub fn operation(&self) -> PatchOperationKind {
        self.operation
    }

    /// Target field
    pub fn field(&self) -> &JsonPointer {
        &self.field
    }

    /// Operand, if any
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
}
