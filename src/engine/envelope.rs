use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Uniform outcome of every query and mutation.
///
/// `success == true` means `error` is absent; `success == false` means `data`
/// is `null` and `error` says what went wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: data.into(),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(message.into()),
        }
    }

    /// Recognizes an envelope-shaped value: an object with a boolean `success` field.
    ///
    /// The boolean alone decides the outcome. A non-string `error` is reduced
    /// to its `message` field when it has one, else to its JSON text.
    pub fn from_value(value: &Value) -> Option<Self> {
        let Some(Value::Bool(success)) = value.get("success") else {
            return None;
        };
        let error = match value.get("error") {
            None | Some(Value::Null) => None,
            Some(Value::String(message)) => Some(message.clone()),
            Some(other) => Some(match other.get("message") {
                Some(Value::String(message)) => message.clone(),
                _ => other.to_string(),
            }),
        };
        Some(Self {
            success: *success,
            data: value.get("data").cloned().unwrap_or(Value::Null),
            error,
        })
    }

    /// Converts into a `Result`, failing with [`Error::Query`] on `success == false`.
    pub fn into_result(self) -> Result<Value> {
        if self.success {
            Ok(self.data)
        } else {
            Err(Error::Query(self.error.unwrap_or_else(|| "query failed".to_string())))
        }
    }
}

impl From<Envelope> for Value {
    fn from(envelope: Envelope) -> Self {
        serde_json::to_value(envelope).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialized_shape() {
        assert_eq!(Value::from(Envelope::ok(json!([1]))), json!({"success": true, "data": [1]}));
        assert_eq!(
            Value::from(Envelope::err("nope")),
            json!({"success": false, "data": null, "error": "nope"})
        );
    }

    #[test]
    fn test_from_value_requires_bool_success() {
        assert!(Envelope::from_value(&json!({"success": true, "data": 1})).is_some());
        assert!(Envelope::from_value(&json!({"success": "yes"})).is_none());
        assert!(Envelope::from_value(&json!([{"success": true}])).is_none());
        let partial = Envelope::from_value(&json!({"success": false, "error": "x"})).unwrap();
        assert_eq!(partial.data, Value::Null);
    }

    #[test]
    fn test_structured_error_still_fails() {
        let env = Envelope::from_value(&json!({
            "success": false,
            "error": {"message": "forbidden", "code": "403"}
        }))
        .unwrap();
        assert!(!env.success);
        assert_eq!(env.error.as_deref(), Some("forbidden"));

        let env = Envelope::from_value(&json!({"success": false, "error": 500})).unwrap();
        assert!(!env.success);
        assert_eq!(env.error.as_deref(), Some("500"));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(Envelope::ok(3).into_result().unwrap(), json!(3));
        assert!(matches!(Envelope::err("bad").into_result(), Err(Error::Query(m)) if m == "bad"));
    }
}
