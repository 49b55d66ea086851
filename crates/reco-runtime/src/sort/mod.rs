//! The final ordering phase.
//!
//! Candidates reaching this phase are clamped against the core score
//! invariant, run through the scene's sorter chain (score ordering when
//! none is configured), and truncated to the response size.

use std::sync::Arc;
use std::time::Instant;

use reco_kernel::Registry;
use reco_kernel::api::PhaseTrace;
use reco_kernel::config::{SceneConfig, SortConfig, SortKind};
use reco_kernel::context::RequestContext;
use reco_kernel::item::{Item, ranking_cmp};
use reco_kernel::scoring::NEUTRAL_SCORE;
use reco_kernel::traits::CandidateSorter;

/// Run the scene's sorter chain and truncate to `final_count`.
pub fn run(
    registry: &Arc<Registry>,
    scene: &SceneConfig,
    mut items: Vec<Item>,
    ctx: &RequestContext,
    final_count: usize,
) -> (Vec<Item>, PhaseTrace) {
    let started = Instant::now();
    let mut trace = PhaseTrace {
        phase: "sort".to_string(),
        count_in: items.len(),
        ..PhaseTrace::default()
    };

    // Core invariant: nothing non-finite and nothing anonymous may be
    // ordered. Scores are clamped, malformed candidates are dropped.
    items.retain(|item| {
        if item.id.is_empty() || item.retrieve_sources.is_empty() {
            ctx.log_warn(format!(
                "dropping malformed candidate {:?}/{:?} before sort",
                item.item_type, item.id
            ));
            ctx.count_invariant_violation();
            return false;
        }
        true
    });
    for item in &mut items {
        if !item.score.is_finite() {
            ctx.log_warn(format!(
                "candidate {}/{} reached sort with non-finite score, clamping",
                item.item_type, item.id
            ));
            ctx.count_invariant_violation();
            item.score = NEUTRAL_SCORE;
        }
    }

    if scene.sort_names.is_empty() {
        items.sort_by(ranking_cmp);
    }
    for name in &scene.sort_names {
        match registry.lookup_sorter(name) {
            Ok(sorter) => sorter.sort(&mut items, ctx),
            Err(e) => ctx.log_error(format!("sorter {name}: {e}")),
        }
    }

    items.truncate(final_count);
    trace.count_out = items.len();
    trace.elapsed_ms = started.elapsed().as_millis() as u64;
    (items, trace)
}

/// Score descending, ties broken by `(item_type, id)` ascending so the
/// result is deterministic across replicas.
pub struct ScoreSorter {
    name: String,
}

impl CandidateSorter for ScoreSorter {
    fn name(&self) -> &str {
        &self.name
    }

    fn sort(&self, items: &mut [Item], _ctx: &RequestContext) {
        items.sort_by(ranking_cmp);
    }
}

/// Multiplies scores by configured factors where an item property
/// matches, then restores score order.
pub struct BoostSorter {
    name: String,
    boosts: Vec<reco_kernel::config::BoostRule>,
}

impl CandidateSorter for BoostSorter {
    fn name(&self) -> &str {
        &self.name
    }

    fn sort(&self, items: &mut [Item], _ctx: &RequestContext) {
        for item in items.iter_mut() {
            for rule in &self.boosts {
                let matches = item
                    .string_property(&rule.property)
                    .map(|v| v == rule.equals)
                    .or_else(|| {
                        item.float_property(&rule.property)
                            .map(|v| v.to_string() == rule.equals)
                    })
                    .unwrap_or(false);
                if matches {
                    item.score *= rule.factor;
                }
            }
        }
        items.sort_by(ranking_cmp);
    }
}

/// Bounds the run length of items sharing a category attribute by
/// pulling the nearest differing item forward, which minimizes score
/// loss for the demoted block.
pub struct DiversitySorter {
    name: String,
    category_property: String,
    max_run_length: usize,
}

impl CandidateSorter for DiversitySorter {
    fn name(&self) -> &str {
        &self.name
    }

    fn sort(&self, items: &mut [Item], _ctx: &RequestContext) {
        let max_run = self.max_run_length.max(1);
        let category = |item: &Item| -> String {
            item.string_property(&self.category_property)
                .unwrap_or_default()
                .to_string()
        };

        let mut run = 0usize;
        let mut prev: Option<String> = None;
        let mut i = 0usize;
        while i < items.len() {
            let cat = category(&items[i]);
            if prev.as_deref() == Some(cat.as_str()) {
                run += 1;
            } else {
                run = 1;
                prev = Some(cat.clone());
            }
            if run > max_run {
                match (i + 1..items.len()).find(|&j| category(&items[j]) != cat) {
                    Some(j) => {
                        items[i..=j].rotate_right(1);
                        prev = Some(category(&items[i]));
                        run = 1;
                    }
                    // Only this category remains; nothing to interleave.
                    None => break,
                }
            }
            i += 1;
        }
    }
}

/// Construct a sorter instance from its configuration subtree.
pub fn build_sorter(cfg: &SortConfig) -> Result<Arc<dyn CandidateSorter>, String> {
    match cfg.kind {
        SortKind::Score => Ok(Arc::new(ScoreSorter {
            name: cfg.name.clone(),
        })),
        SortKind::Boost => {
            if cfg.boosts.is_empty() {
                return Err("boost sorter needs at least one boost rule".to_string());
            }
            Ok(Arc::new(BoostSorter {
                name: cfg.name.clone(),
                boosts: cfg.boosts.clone(),
            }))
        }
        SortKind::Diversity => {
            let category_property = cfg
                .category_property
                .clone()
                .ok_or_else(|| "missing category_property".to_string())?;
            Ok(Arc::new(DiversitySorter {
                name: cfg.name.clone(),
                category_property,
                max_run_length: cfg.max_run_length,
            }))
        }
    }
}
