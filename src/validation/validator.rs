use std::collections::HashMap;

use tracing::debug;

use super::field::{FieldSpec, FieldValue};
use crate::error::{ValidationError, Violation};
use crate::types::RawRequest;

/// Fields that passed validation, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedFields {
    values: HashMap<String, FieldValue>,
}

impl ValidatedFields {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Checks a [`RawRequest`] against an ordered list of [`FieldSpec`]s.
///
/// Every field is checked; violations are collected in declaration order
/// and returned together, never just the first one.
#[derive(Debug, Clone)]
pub struct Validator {
    specs: Vec<FieldSpec>,
}

impl Validator {
    pub fn new(specs: Vec<FieldSpec>) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &[FieldSpec] {
        &self.specs
    }

    pub fn validate(&self, raw: &RawRequest) -> Result<ValidatedFields, ValidationError> {
        let mut values = HashMap::with_capacity(self.specs.len());
        let mut violations = Vec::new();

        for spec in &self.specs {
            match spec.check(raw.get(spec.name())) {
                Ok(Some(value)) => {
                    values.insert(spec.name().to_string(), value);
                }
                Ok(None) => {}
                Err(message) => violations.push(Violation::new(spec.name(), message)),
            }
        }

        if violations.is_empty() {
            Ok(ValidatedFields { values })
        } else {
            debug!(violations = violations.len(), "request rejected by validator");
            Err(ValidationError { violations })
        }
    }
}
