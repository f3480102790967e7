//! Base implementation of records.
use crate::error::TrellisError;
use std::collections::HashMap;

/// Represents possible types of values that can be stored in a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// A single floating-point value, typically used for metrics like update time.
    Scalar(f32),

    /// A text value, useful for storing labels or descriptions.
    String(String),
}

/// A container for storing key-value pairs of various data types.
#[derive(Debug, Clone, Default)]
pub struct Record(HashMap<String, RecordValue>);

impl Record {
    /// Creates a record containing a single scalar value.
    pub fn from_scalar(name: impl Into<String>, value: f32) -> Self {
        Self(HashMap::from([(name.into(), RecordValue::Scalar(value))]))
    }

    /// Inserts a key-value pair into the record.
    pub fn insert(&mut self, k: impl Into<String>, v: RecordValue) {
        self.0.insert(k.into(), v);
    }

    /// Gets a scalar value from the record.
    pub fn get_scalar(&self, k: &str) -> Result<f32, TrellisError> {
        if let Some(v) = self.0.get(k) {
            match v {
                RecordValue::Scalar(v) => Ok(*v),
                _ => Err(TrellisError::RecordValueTypeError("Scalar".to_string())),
            }
        } else {
            Err(TrellisError::RecordKeyError(k.to_string()))
        }
    }

    /// Gets a string value from the record.
    pub fn get_string(&self, k: &str) -> Result<String, TrellisError> {
        if let Some(v) = self.0.get(k) {
            match v {
                RecordValue::String(s) => Ok(s.clone()),
                _ => Err(TrellisError::RecordValueTypeError("String".to_string())),
            }
        } else {
            Err(TrellisError::RecordKeyError(k.to_string()))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_typed_access() {
        let mut record = Record::from_scalar("version", 3.0);
        record.insert("updated_policies", RecordValue::String("p1,p2".to_string()));
        assert_eq!(record.get_scalar("version").unwrap(), 3.0);
        assert_eq!(record.get_string("updated_policies").unwrap(), "p1,p2");
        assert!(matches!(
            record.get_scalar("updated_policies"),
            Err(TrellisError::RecordValueTypeError(_))
        ));
        assert!(matches!(
            record.get_string("missing"),
            Err(TrellisError::RecordKeyError(_))
        ));
    }
}
