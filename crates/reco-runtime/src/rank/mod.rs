//! The scoring phase.
//!
//! Features are assembled per candidate (item properties, configured user
//! features, request parameters, batched feature-DAO reads), dispatched
//! to the scene's scoring algorithms in bounded batches, and written back
//! by (candidate, record) pairing. Batches that fail or outlive the phase
//! budget degrade to the configured neutral score. With several
//! algorithms configured, the per-algorithm scores combine under the
//! scene's ensemble combiner.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;

use reco_backends::AlgorithmDispatcher;
use reco_kernel::Registry;
use reco_kernel::api::PhaseTrace;
use reco_kernel::config::{Combiner, SceneConfig};
use reco_kernel::context::RequestContext;
use reco_kernel::item::{Item, PropertyValue};
use reco_kernel::scoring::{AlgoInput, FeatureMatrix};
use reco_kernel::user::User;

/// Feature-map key carrying the candidate's id.
const ITEM_ID_FEATURE: &str = "item_id";

/// Prefix of user-bag features copied into candidate feature maps.
const USER_PREFIX: &str = "user__";

/// Run the scene's rank configuration over the candidate list.
pub async fn run(
    registry: &Arc<Registry>,
    dispatcher: &AlgorithmDispatcher,
    scene: &SceneConfig,
    mut items: Vec<Item>,
    user: &Arc<User>,
    ctx: &Arc<RequestContext>,
) -> (Vec<Item>, PhaseTrace) {
    let started = Instant::now();
    let mut trace = PhaseTrace {
        phase: "rank".to_string(),
        count_in: items.len(),
        count_out: items.len(),
        ..PhaseTrace::default()
    };

    let rank = &scene.rank;
    if rank.algorithms.is_empty() || items.is_empty() {
        trace.elapsed_ms = started.elapsed().as_millis() as u64;
        return (items, trace);
    }

    let budget = ctx.phase_budget(scene.budgets.rank_ms);
    let phase_deadline = tokio::time::Instant::now() + budget;

    enrich_from_feature_dao(registry, scene, &mut items, ctx, phase_deadline).await;

    // Features shared by every candidate of this request. Only the
    // configured user-bag keys are mirrored; the full bag (which also
    // holds the request parameters) would bloat every remote payload.
    let mut shared: Vec<(String, PropertyValue)> = Vec::new();
    for key in &rank.user_features {
        if let Some(value) = user.property(key) {
            shared.push((format!("{USER_PREFIX}{key}"), value));
        }
    }

    let batch_size = rank.batch_size.max(1);
    let batches: Vec<(usize, usize)> = (0..items.len())
        .step_by(batch_size)
        .map(|start| (start, (start + batch_size).min(items.len())))
        .collect();

    // One dispatch future per (batch, algorithm) pair; all run
    // concurrently and may resolve in any order. Assignment pairs by
    // position, not by arrival.
    let mut calls = Vec::with_capacity(batches.len() * rank.algorithms.len());
    for &(start, end) in &batches {
        let matrix: FeatureMatrix = items[start..end]
            .iter()
            .map(|item| {
                let mut features = item.properties.clone();
                features.insert(ITEM_ID_FEATURE.to_string(), item.id.clone().into());
                for (key, value) in &shared {
                    features.insert(key.clone(), value.clone());
                }
                features
            })
            .collect();
        for (algo_idx, algo) in rank.algorithms.iter().enumerate() {
            let matrix = matrix.clone();
            let name = algo.name.clone();
            let ctx = Arc::clone(ctx);
            calls.push(async move {
                let result = tokio::time::timeout_at(
                    phase_deadline,
                    dispatcher.run(&name, AlgoInput::Features(matrix), &ctx),
                )
                .await;
                (start, end, algo_idx, name, result)
            });
        }
    }

    // score_grid[algo][candidate]
    let mut score_grid: Vec<Vec<Option<f64>>> =
        vec![vec![None; items.len()]; rank.algorithms.len()];

    for (start, end, algo_idx, name, result) in join_all(calls).await {
        match result {
            Ok(Ok(records)) if records.len() == end - start => {
                for (offset, record) in records.into_iter().enumerate() {
                    let idx = start + offset;
                    score_grid[algo_idx][idx] = Some(record.score);
                    if let Some(map) = record.score_map {
                        for (k, v) in map {
                            items[idx].score_map.insert(k, v);
                        }
                    }
                }
            }
            Ok(Ok(records)) => {
                ctx.log_warn(format!(
                    "algorithm {name} answered {} records for a batch of {}, ignoring",
                    records.len(),
                    end - start
                ));
            }
            Ok(Err(e)) => {
                ctx.log_warn(format!(
                    "algorithm {name} failed for batch {start}..{end}: {e}, scoring neutral"
                ));
            }
            Err(_) => {
                trace.deadline_hit = true;
                ctx.log_warn(format!(
                    "algorithm {name} missed the rank budget for batch {start}..{end}, scoring neutral"
                ));
            }
        }
    }

    combine_scores(rank, &score_grid, &mut items);

    trace.count_out = items.len();
    trace.elapsed_ms = started.elapsed().as_millis() as u64;
    (items, trace)
}

/// Batched feature enrichment from the scene's feature DAO.
async fn enrich_from_feature_dao(
    registry: &Arc<Registry>,
    scene: &SceneConfig,
    items: &mut [Item],
    ctx: &Arc<RequestContext>,
    phase_deadline: tokio::time::Instant,
) {
    let Some(dao_name) = &scene.rank.feature_dao else {
        return;
    };
    let dao = match registry.lookup_dao(dao_name) {
        Ok(dao) => dao,
        Err(e) => {
            ctx.log_error(format!("feature dao {dao_name}: {e}"));
            return;
        }
    };
    let keys: Vec<String> = items.iter().map(|item| item.id.clone()).collect();
    match tokio::time::timeout_at(phase_deadline, dao.batch_features(&keys, ctx)).await {
        Ok(Ok(mut table)) => {
            for item in items.iter_mut() {
                if let Some(features) = table.remove(&item.id) {
                    for (k, v) in features {
                        item.properties.entry(k).or_insert(v);
                    }
                }
            }
        }
        Ok(Err(e)) => ctx.log_warn(format!("feature dao {dao_name} failed: {e}")),
        Err(_) => ctx.log_warn(format!("feature dao {dao_name} missed the rank budget")),
    }
}

/// Fold the per-algorithm score grid into each candidate's primary score.
fn combine_scores(
    rank: &reco_kernel::config::RankSettings,
    score_grid: &[Vec<Option<f64>>],
    items: &mut [Item],
) {
    let neutral = rank.neutral_score;
    let algos = &rank.algorithms;

    if algos.len() == 1 {
        for (idx, item) in items.iter_mut().enumerate() {
            item.score = score_grid[0][idx].unwrap_or(neutral);
        }
        return;
    }

    // Multi-objective: each algorithm's score lands in the score map
    // before combining.
    for (algo_idx, algo) in algos.iter().enumerate() {
        for (idx, item) in items.iter_mut().enumerate() {
            let score = score_grid[algo_idx][idx].unwrap_or(neutral);
            item.score_map.insert(algo.name.clone(), score);
        }
    }

    let total_weight: f64 = algos.iter().map(|a| a.weight).sum();
    match rank.combiner {
        Combiner::Weighted => {
            for (idx, item) in items.iter_mut().enumerate() {
                let weighted: f64 = algos
                    .iter()
                    .enumerate()
                    .map(|(k, a)| a.weight * score_grid[k][idx].unwrap_or(neutral))
                    .sum();
                item.score = weighted / total_weight;
            }
        }
        Combiner::Product => {
            for (idx, item) in items.iter_mut().enumerate() {
                item.score = (0..algos.len())
                    .map(|k| score_grid[k][idx].unwrap_or(neutral))
                    .product();
            }
        }
        Combiner::Rank => {
            // Weighted mean reciprocal rank across per-algorithm orderings.
            let mut reciprocal = vec![0.0f64; items.len()];
            for (k, algo) in algos.iter().enumerate() {
                let mut order: Vec<usize> = (0..items.len()).collect();
                order.sort_by(|&a, &b| {
                    let sa = score_grid[k][a].unwrap_or(neutral);
                    let sb = score_grid[k][b].unwrap_or(neutral);
                    sb.partial_cmp(&sa)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| items[a].id.cmp(&items[b].id))
                });
                for (position, &idx) in order.iter().enumerate() {
                    reciprocal[idx] += algo.weight / (position as f64 + 1.0);
                }
            }
            for (idx, item) in items.iter_mut().enumerate() {
                item.score = reciprocal[idx] / total_weight;
            }
        }
    }
}
