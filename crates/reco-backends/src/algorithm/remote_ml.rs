//! Remote model-serving client.
//!
//! Serializes the feature batch per the configured processor profile,
//! POSTs it to the endpoint with the configured auth headers and timeout,
//! retries with exponential backoff, and hands the body to the configured
//! response parser.

use serde_json::{Value, json};
use std::sync::Arc;

use reco_kernel::config::RemoteMlSettings;
use reco_kernel::context::RequestContext;
use reco_kernel::error::{BackendError, BackendResult};
use reco_kernel::scoring::{AlgoInput, ScoredRecord};

use super::parsers::{ResponseParser, parser_by_name};
use crate::retry::{RetryConfig, retry_with_budget};

/// Backoff base for model-server retries, doubled per attempt.
const RETRY_BASE_MS: u64 = 100;

pub struct RemoteMlClient {
    settings: RemoteMlSettings,
    parser: Arc<dyn ResponseParser>,
    http: reqwest::Client,
}

impl RemoteMlClient {
    pub fn new(settings: &RemoteMlSettings) -> Result<Self, String> {
        let parser = parser_by_name(&settings.response_parser_name, &settings.requested_outputs)
            .ok_or_else(|| {
                format!(
                    "unknown response parser {:?}",
                    settings.response_parser_name
                )
            })?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| format!("model client construction failed: {e}"))?;
        Ok(Self {
            settings: settings.clone(),
            parser,
            http,
        })
    }

    /// Serialize the input per the processor profile.
    fn payload(&self, input: &AlgoInput) -> BackendResult<Value> {
        let AlgoInput::Features(maps) = input else {
            return Err(BackendError::BadInput(
                "remote scoring expects per-candidate feature maps".into(),
            ));
        };
        match self.settings.processor_kind.as_str() {
            // {"instances": [...], "outputs": [...]}
            "json" => {
                let instances = serde_json::to_value(maps)
                    .map_err(|e| BackendError::BadInput(e.to_string()))?;
                Ok(json!({
                    "instances": instances,
                    "outputs": self.settings.requested_outputs,
                }))
            }
            // {"inputs": {"feature": [col...]}} columnar profile
            "columnar" => {
                let mut columns = serde_json::Map::new();
                let keys: std::collections::BTreeSet<&String> =
                    maps.iter().flat_map(|m| m.keys()).collect();
                for key in keys {
                    let column: Vec<Value> = maps
                        .iter()
                        .map(|m| {
                            m.get(key)
                                .map(|v| serde_json::to_value(v).unwrap_or(Value::Null))
                                .unwrap_or(Value::Null)
                        })
                        .collect();
                    columns.insert(key.clone(), Value::Array(column));
                }
                Ok(json!({
                    "inputs": Value::Object(columns),
                    "outputs": self.settings.requested_outputs,
                }))
            }
            other => Err(BackendError::BadInput(format!(
                "unknown processor kind {other:?}"
            ))),
        }
    }

    async fn post_once(&self, payload: &Value) -> BackendResult<Value> {
        let mut request = self.http.post(&self.settings.endpoint_url).json(payload);
        for (name, value) in &self.settings.auth_headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(self.settings.timeout_ms)
            } else {
                BackendError::Transport(e.to_string())
            }
        })?;
        let response = response
            .error_for_status()
            .map_err(|e| BackendError::BadResponse(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| BackendError::BadResponse(e.to_string()))
    }

    pub async fn invoke(
        &self,
        input: &AlgoInput,
        ctx: &RequestContext,
    ) -> BackendResult<Vec<ScoredRecord>> {
        let expected = input.len();
        let payload = self.payload(input)?;

        let retry = RetryConfig {
            max_attempts: self.settings.retry_times as usize + 1,
            policy: crate::retry::RetryPolicy::ExponentialBackoff {
                base_ms: RETRY_BASE_MS,
                max_ms: RETRY_BASE_MS << 4,
                jitter: false,
            },
        };
        let body =
            retry_with_budget(&retry, ctx.deadline_remaining(), || self.post_once(&payload))
                .await?;

        let records = self.parser.parse(&body)?;
        if records.len() != expected {
            return Err(BackendError::BadResponse(format!(
                "{} records for {} candidates",
                records.len(),
                expected
            )));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reco_kernel::item::PropertyValue;
    use std::collections::HashMap;

    fn settings() -> RemoteMlSettings {
        RemoteMlSettings {
            endpoint_url: "http://localhost:9000/score".into(),
            processor_kind: "json".into(),
            auth_headers: HashMap::new(),
            timeout_ms: 100,
            retry_times: 0,
            response_parser_name: "score-list".into(),
            requested_outputs: vec![],
        }
    }

    #[test]
    fn unknown_parser_fails_construction() {
        let mut s = settings();
        s.response_parser_name = "nope".into();
        assert!(RemoteMlClient::new(&s).is_err());
    }

    #[test]
    fn json_payload_shape() {
        let client = RemoteMlClient::new(&settings()).unwrap();
        let maps = vec![HashMap::from([(
            "rel".to_string(),
            PropertyValue::Number(0.9),
        )])];
        let payload = client.payload(&AlgoInput::Features(maps)).unwrap();
        assert_eq!(payload["instances"][0]["rel"], 0.9);
    }

    #[test]
    fn columnar_payload_aligns_missing_values() {
        let mut s = settings();
        s.processor_kind = "columnar".into();
        let client = RemoteMlClient::new(&s).unwrap();
        let maps = vec![
            HashMap::from([("a".to_string(), PropertyValue::Number(1.0))]),
            HashMap::from([("b".to_string(), PropertyValue::Number(2.0))]),
        ];
        let payload = client.payload(&AlgoInput::Features(maps)).unwrap();
        assert_eq!(payload["inputs"]["a"][0], 1.0);
        assert!(payload["inputs"]["a"][1].is_null());
        assert_eq!(payload["inputs"]["b"][1], 2.0);
    }

    #[test]
    fn vector_input_is_rejected() {
        let client = RemoteMlClient::new(&settings()).unwrap();
        let err = client
            .payload(&AlgoInput::Vector {
                query: vec![0.1],
                top_k: 3,
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::BadInput(_)));
    }
}
