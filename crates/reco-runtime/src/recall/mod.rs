//! The candidate-generation phase.
//!
//! Every recall named by the scene runs as its own task bound to the
//! phase deadline, handing its result back through a bounded channel.
//! Errors and panics are confined to the task that raised them; recalls
//! that miss the deadline are abandoned and their results discarded. The
//! merge step then imposes a deterministic total order on whatever
//! arrived: dedup by `(item_type, id)`, keep the max score, union the
//! retrieve sources, order by score then key, truncate to the scene cap.

mod sources;

pub use sources::{ConfiguredRecall, build_recall};

use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use reco_kernel::Registry;
use reco_kernel::api::PhaseTrace;
use reco_kernel::config::SceneConfig;
use reco_kernel::context::RequestContext;
use reco_kernel::error::BackendError;
use reco_kernel::item::{Item, ItemKey, ranking_cmp};
use reco_kernel::user::User;

/// Run the scene's recall set and return the merged candidate list.
pub async fn run(
    registry: &Arc<Registry>,
    scene: &SceneConfig,
    user: &Arc<User>,
    ctx: &Arc<RequestContext>,
) -> (Vec<Item>, PhaseTrace) {
    let started = Instant::now();
    let mut trace = PhaseTrace {
        phase: "recall".to_string(),
        ..PhaseTrace::default()
    };

    if scene.recall_names.is_empty() {
        trace.elapsed_ms = started.elapsed().as_millis() as u64;
        return (Vec::new(), trace);
    }

    let budget = ctx.phase_budget(scene.budgets.recall_ms);
    let deadline = tokio::time::Instant::now() + budget;

    let (tx, mut rx) = mpsc::channel(scene.recall_names.len());
    let mut expected = 0usize;

    for name in &scene.recall_names {
        let source = match registry.lookup_recall(name) {
            Ok(source) => source,
            Err(e) => {
                ctx.log_error(format!("recall {name}: {e}"));
                continue;
            }
        };
        let tx = tx.clone();
        let user = Arc::clone(user);
        let ctx_task = Arc::clone(ctx);
        let name = name.clone();
        expected += 1;

        tokio::spawn(async move {
            let result = std::panic::AssertUnwindSafe(source.recall(&user, &ctx_task))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(BackendError::Other("recall panicked".into())));
            let limit = source.limit();
            let result = result.map(|mut items| {
                if items.len() > limit {
                    items.truncate(limit);
                }
                items
            });
            // Receiver may already have given up on us.
            let _ = tx.send((name, result)).await;
        });
    }
    drop(tx);

    let mut collected: Vec<Item> = Vec::new();
    let mut received = 0usize;
    while received < expected {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some((name, Ok(items)))) => {
                received += 1;
                ctx.log_debug(format!("recall {name} returned {} items", items.len()));
                collected.extend(items);
            }
            Ok(Some((name, Err(e)))) => {
                received += 1;
                ctx.log_error(format!("recall {name} failed: {e}"));
            }
            // All senders gone; panicked tasks never send.
            Ok(None) => break,
            Err(_) => {
                trace.deadline_hit = true;
                ctx.log_error(format!(
                    "recall phase deadline after {} of {expected} recalls",
                    received
                ));
                break;
            }
        }
    }

    trace.count_in = collected.len();
    let merged = merge_candidates(collected, scene.recall_cap);
    trace.count_out = merged.len();
    trace.elapsed_ms = started.elapsed().as_millis() as u64;
    (merged, trace)
}

/// Dedup by `(item_type, id)`, keep the best of each duplicate set, and
/// impose the deterministic order before truncating to `cap`.
///
/// Items with an empty id never survive the merge.
pub fn merge_candidates(items: Vec<Item>, cap: usize) -> Vec<Item> {
    let mut by_key: HashMap<ItemKey, Item> = HashMap::with_capacity(items.len());
    for item in items {
        if item.id.is_empty() {
            continue;
        }
        match by_key.entry(item.key()) {
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                slot.get_mut().absorb(item);
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(item);
            }
        }
    }
    let mut merged: Vec<Item> = by_key.into_values().collect();
    merged.sort_by(ranking_cmp);
    merged.truncate(cap);
    merged
}
