//! Field-lookup scoring: the score is read straight off a feature.

use reco_kernel::config::FieldLookupSettings;
use reco_kernel::context::RequestContext;
use reco_kernel::error::{BackendError, BackendResult};
use reco_kernel::scoring::{AlgoInput, ScoredRecord};

/// Extracts a configured field from each input feature map.
///
/// Absent or non-numeric fields score the configured default and log a
/// warning; the response always pairs 1:1 with the input.
pub struct FieldLookup {
    field_name: String,
    default_score: f64,
}

impl FieldLookup {
    pub fn new(settings: &FieldLookupSettings) -> Self {
        Self {
            field_name: settings.field_name.clone(),
            default_score: settings.default_score,
        }
    }

    pub fn score(&self, input: &AlgoInput, ctx: &RequestContext) -> BackendResult<Vec<ScoredRecord>> {
        let AlgoInput::Features(maps) = input else {
            return Err(BackendError::BadInput(
                "field lookup expects per-candidate feature maps".into(),
            ));
        };

        let records = maps
            .iter()
            .map(|features| {
                match features.get(&self.field_name).and_then(|v| v.as_f64()) {
                    Some(v) if v.is_finite() => ScoredRecord::new(v),
                    _ => {
                        ctx.log_warn(format!(
                            "field {:?} absent or non-numeric, scoring default {}",
                            self.field_name, self.default_score
                        ));
                        ScoredRecord::new(self.default_score)
                    }
                }
            })
            .collect();
        Ok(records)
    }
}
