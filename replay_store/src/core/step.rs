//! Step records and their schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::array::{Array, DType};
use crate::error::{ReplayError, Result};

/// Flag set on the first step of an episode.
pub const IS_FIRST: &str = "is_first";
/// Flag set on exactly the final step of an episode.
pub const IS_LAST: &str = "is_last";
/// Flag set when the episode ended in an absorbing state (not a time limit).
pub const IS_TERMINAL: &str = "is_terminal";

/// Reserved boundary flags. Each is a scalar bool.
pub const BOUNDARY_FLAGS: [&str; 3] = [IS_FIRST, IS_LAST, IS_TERMINAL];

/// One environment step: field name to typed array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    fields: BTreeMap<String, Array>,
}

impl Step {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add or replace a field.
    pub fn with(mut self, name: impl Into<String>, value: Array) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Builder: set a boundary flag.
    pub fn with_flag(self, name: &str, value: bool) -> Self {
        self.with(name, Array::scalar_bool(value))
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Array) {
        self.fields.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Array> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, Array> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Read a boundary flag; absent means `false`.
    pub fn flag(&self, name: &str) -> bool {
        self.fields
            .get(name)
            .and_then(Array::as_bool_scalar)
            .unwrap_or(false)
    }

    pub fn is_first(&self) -> bool {
        self.flag(IS_FIRST)
    }

    pub fn is_last(&self) -> bool {
        self.flag(IS_LAST)
    }

    pub fn is_terminal(&self) -> bool {
        self.flag(IS_TERMINAL)
    }

    /// Schema of this step.
    pub fn schema(&self) -> Schema {
        Schema {
            fields: self
                .fields
                .iter()
                .map(|(name, value)| (name.clone(), FieldSpec::of(value)))
                .collect(),
        }
    }

    /// A step with the same schema and every element zeroed.
    pub fn zeros_like(&self) -> Step {
        Step {
            fields: self
                .fields
                .iter()
                .map(|(name, value)| (name.clone(), Array::zeros(value.dtype(), value.shape())))
                .collect(),
        }
    }

    /// Fill in absent boundary flags and reject malformed ones.
    pub(crate) fn normalize_flags(&mut self) -> Result<()> {
        for name in BOUNDARY_FLAGS {
            match self.fields.get(name) {
                Some(value) if value.as_bool_scalar().is_none() => {
                    return Err(ReplayError::schema(
                        name,
                        format!(
                            "boundary flag must be a scalar bool, got {}{:?}",
                            value.dtype(),
                            value.shape()
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    self.fields.insert(name.to_string(), Array::scalar_bool(false));
                }
            }
        }
        Ok(())
    }
}

/// Dtype and shape of one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldSpec {
    pub dtype: DType,
    pub shape: Vec<usize>,
}

impl FieldSpec {
    pub fn of(value: &Array) -> Self {
        Self {
            dtype: value.dtype(),
            shape: value.shape().to_vec(),
        }
    }
}

/// The key set, dtypes and shapes shared by every step in a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: BTreeMap<String, FieldSpec>,
}

impl Schema {
    /// Check `step` against this schema, naming the first offending field.
    pub fn check(&self, step: &Step) -> Result<()> {
        for (name, spec) in &self.fields {
            let value = step
                .get(name)
                .ok_or_else(|| ReplayError::schema(name, "field missing"))?;
            if value.dtype() != spec.dtype {
                return Err(ReplayError::schema(
                    name,
                    format!("expected dtype {}, got {}", spec.dtype, value.dtype()),
                ));
            }
            if value.shape() != spec.shape.as_slice() {
                return Err(ReplayError::schema(
                    name,
                    format!("expected shape {:?}, got {:?}", spec.shape, value.shape()),
                ));
            }
        }
        if let Some(extra) = step.fields().keys().find(|k| !self.fields.contains_key(*k)) {
            return Err(ReplayError::schema(extra, "unexpected field"));
        }
        Ok(())
    }

    /// Check two schemas for equality with the same error reporting as [`check`].
    ///
    /// [`check`]: Schema::check
    pub fn check_schema(&self, other: &Schema) -> Result<()> {
        if self == other {
            return Ok(());
        }
        for (name, spec) in &self.fields {
            match other.fields.get(name) {
                None => return Err(ReplayError::schema(name, "field missing")),
                Some(o) if o != spec => {
                    return Err(ReplayError::schema(
                        name,
                        format!(
                            "expected {}{:?}, got {}{:?}",
                            spec.dtype, spec.shape, o.dtype, o.shape
                        ),
                    ))
                }
                Some(_) => {}
            }
        }
        let extra = other
            .fields
            .keys()
            .find(|k| !self.fields.contains_key(*k))
            .cloned()
            .unwrap_or_default();
        Err(ReplayError::schema(extra, "unexpected field"))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
