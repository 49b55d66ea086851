//! Response parsers for remote model-serving backends.
//!
//! A parser turns the backend's JSON body into the uniform
//! [`ScoredRecord`] sequence. The parser is selected per algorithm by
//! `response_parser_name`.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use reco_kernel::error::{BackendError, BackendResult};
use reco_kernel::scoring::ScoredRecord;

/// Turns a model-server response body into scored records.
pub trait ResponseParser: Send + Sync {
    fn name(&self) -> &str;

    fn parse(&self, body: &Value) -> BackendResult<Vec<ScoredRecord>>;
}

/// Resolve a built-in parser by its configured name.
pub fn parser_by_name(
    name: &str,
    requested_outputs: &[String],
) -> Option<Arc<dyn ResponseParser>> {
    match name {
        "score-list" => Some(Arc::new(ScoreListParser)),
        "output-map" => Some(Arc::new(OutputMapParser {
            outputs: requested_outputs.to_vec(),
        })),
        _ => None,
    }
}

/// Parses `{"scores": [..]}` or a bare top-level number array.
///
/// Every entry becomes one record with that primary score.
pub struct ScoreListParser;

impl ResponseParser for ScoreListParser {
    fn name(&self) -> &str {
        "score-list"
    }

    fn parse(&self, body: &Value) -> BackendResult<Vec<ScoredRecord>> {
        let scores = body
            .get("scores")
            .or(Some(body))
            .and_then(Value::as_array)
            .ok_or_else(|| {
                BackendError::BadResponse("expected a score array or {\"scores\": [..]}".into())
            })?;

        scores
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(ScoredRecord::new)
                    .ok_or_else(|| BackendError::BadResponse(format!("non-numeric score: {v}")))
            })
            .collect()
    }
}

/// Parses `{"outputs": {"head": [..], ...}}` multi-head responses.
///
/// The first requested output is the primary score; every head lands in
/// the per-record score map. Heads whose values are nested arrays are
/// exposed through the classify map instead.
pub struct OutputMapParser {
    outputs: Vec<String>,
}

impl ResponseParser for OutputMapParser {
    fn name(&self) -> &str {
        "output-map"
    }

    fn parse(&self, body: &Value) -> BackendResult<Vec<ScoredRecord>> {
        let outputs = body
            .get("outputs")
            .and_then(Value::as_object)
            .ok_or_else(|| BackendError::BadResponse("expected {\"outputs\": {..}}".into()))?;

        let mut scalar_heads: HashMap<&str, Vec<f64>> = HashMap::new();
        let mut classify_heads: HashMap<&str, Vec<Vec<f64>>> = HashMap::new();
        let mut len = None;

        for (head, values) in outputs {
            if !self.outputs.is_empty() && !self.outputs.iter().any(|o| o == head) {
                continue;
            }
            let rows = values.as_array().ok_or_else(|| {
                BackendError::BadResponse(format!("output {head:?} is not an array"))
            })?;
            match len {
                None => len = Some(rows.len()),
                Some(n) if n != rows.len() => {
                    return Err(BackendError::BadResponse(format!(
                        "output {head:?} has {} rows, expected {n}",
                        rows.len()
                    )));
                }
                Some(_) => {}
            }
            if rows.iter().all(Value::is_number) {
                scalar_heads.insert(
                    head,
                    rows.iter().filter_map(Value::as_f64).collect(),
                );
            } else {
                let parsed: Option<Vec<Vec<f64>>> = rows
                    .iter()
                    .map(|r| {
                        r.as_array()
                            .map(|xs| xs.iter().filter_map(Value::as_f64).collect())
                    })
                    .collect();
                classify_heads.insert(
                    head,
                    parsed.ok_or_else(|| {
                        BackendError::BadResponse(format!("output {head:?} has mixed row shapes"))
                    })?,
                );
            }
        }

        let len = len.ok_or_else(|| BackendError::BadResponse("no usable outputs".into()))?;
        let primary_head = self
            .outputs
            .first()
            .map(String::as_str)
            .or_else(|| scalar_heads.keys().min().copied());

        let mut records = Vec::with_capacity(len);
        for i in 0..len {
            let mut record = ScoredRecord::default();
            let mut score_map = HashMap::new();
            for (head, values) in &scalar_heads {
                score_map.insert((*head).to_string(), values[i]);
            }
            record.score = primary_head
                .and_then(|h| score_map.get(h).copied())
                .unwrap_or_else(|| score_map.values().next().copied().unwrap_or(0.0));
            if !score_map.is_empty() {
                record.score_map = Some(score_map);
            }
            if !classify_heads.is_empty() {
                record.classify_map = Some(
                    classify_heads
                        .iter()
                        .map(|(head, rows)| ((*head).to_string(), rows[i].clone()))
                        .collect(),
                );
            }
            records.push(record);
        }
        Ok(records)
    }
}
