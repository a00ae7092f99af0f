//! Wire types shared between the ingress routes and the worker layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ModelName;
use crate::workers::WorkerId;

/// A prediction request as received from a client.
///
/// Only `params.model` is interpreted; everything else is forwarded to the
/// chosen worker untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub params: Map<String, Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PredictRequest {
    /// Extract the target model name, if `params.model` is a string.
    pub fn model_name(&self) -> Option<ModelName> {
        self.params
            .get("model")
            .and_then(Value::as_str)
            .map(ModelName::new)
    }
}

/// Readiness callback body sent by a worker once its model is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReadyNotice {
    pub worker_id: WorkerId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_name_extraction() {
        let request: PredictRequest =
            serde_json::from_str(r#"{"params": {"model": "resnet", "x": 1}}"#).unwrap();
        assert_eq!(request.model_name(), Some(ModelName::new("resnet")));
    }

    #[test]
    fn test_non_string_model_rejected() {
        let request: PredictRequest =
            serde_json::from_str(r#"{"params": {"model": 42}}"#).unwrap();
        assert_eq!(request.model_name(), None);
    }

    #[test]
    fn test_extra_fields_survive_forwarding() {
        let raw = r#"{"params": {"model": "m"}, "inputs": [1, 2, 3]}"#;
        let request: PredictRequest = serde_json::from_str(raw).unwrap();
        let forwarded = serde_json::to_value(&request).unwrap();
        assert_eq!(forwarded["inputs"], serde_json::json!([1, 2, 3]));
        assert_eq!(forwarded["params"]["model"], "m");
    }

    #[test]
    fn test_missing_params_is_a_decode_error() {
        assert!(serde_json::from_str::<PredictRequest>(r#"{"inputs": []}"#).is_err());
    }
}
