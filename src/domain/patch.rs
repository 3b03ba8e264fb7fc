//! JSON merge-patch over stored records
//!
//! PATCH bodies are applied field-by-field onto the serialized record and
//! the result is deserialized again, so every patched record passes through
//! the same validation as a newly created one.

use crate::domain::types::ValidationError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

const FIELD: &str = "body";

/// Apply `patch` onto `record`, skipping `protected` fields
pub fn merge_patch<T>(record: &T, patch: &Value, protected: &[&str]) -> Result<T, ValidationError>
where
    T: Serialize + DeserializeOwned,
{
    let Value::Object(changes) = patch else {
        return Err(ValidationError::new(FIELD, "patch must be a JSON object"));
    };

    let mut current =
        serde_json::to_value(record).map_err(|e| ValidationError::new(FIELD, e.to_string()))?;
    let Value::Object(fields) = &mut current else {
        return Err(ValidationError::new(FIELD, "record is not a JSON object"));
    };

    for (name, value) in changes {
        if protected.contains(&name.as_str()) {
            continue;
        }
        fields.insert(name.clone(), value.clone());
    }

    serde_json::from_value(current).map_err(|e| ValidationError::new(FIELD, e.to_string()))
}

/// Require a JSON object for free-form settings/metadata fields
pub(crate) fn require_object(field: &str, value: &Value) -> Result<(), ValidationError> {
    if value.is_object() {
        Ok(())
    } else {
        Err(ValidationError::new(field, "must be a JSON object"))
    }
}
