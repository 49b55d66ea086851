//! The filter phase.
//!
//! Filters run strictly in the scene's configured order, each receiving
//! the list the previous one retained. A filter that errors is skipped
//! and the pipeline proceeds with the unfiltered slice at that step,
//! trading relevance for availability.

mod builtin;

pub use builtin::{
    CategoryQuotaFilter, ExposureFilter, ItemStateFilter, PropertyThresholdFilter, build_filter,
};

use std::sync::Arc;
use std::time::Instant;

use reco_kernel::Registry;
use reco_kernel::api::PhaseTrace;
use reco_kernel::config::SceneConfig;
use reco_kernel::context::RequestContext;
use reco_kernel::item::Item;
use reco_kernel::user::User;

/// Apply the scene's filter chain to the candidate list.
pub async fn run(
    registry: &Arc<Registry>,
    scene: &SceneConfig,
    mut items: Vec<Item>,
    user: &Arc<User>,
    ctx: &Arc<RequestContext>,
) -> (Vec<Item>, PhaseTrace) {
    let started = Instant::now();
    let mut trace = PhaseTrace {
        phase: "filter".to_string(),
        count_in: items.len(),
        ..PhaseTrace::default()
    };

    let budget = ctx.phase_budget(scene.budgets.filter_ms);
    let deadline = Instant::now() + budget;

    for name in &scene.filter_names {
        if Instant::now() >= deadline {
            trace.deadline_hit = true;
            ctx.log_warn(format!("filter phase budget exhausted before {name}"));
            break;
        }
        let filter = match registry.lookup_filter(name) {
            Ok(filter) => filter,
            Err(e) => {
                ctx.log_error(format!("filter {name}: {e}"));
                continue;
            }
        };
        match filter.apply(items.clone(), user, ctx).await {
            Ok(retained) => {
                ctx.log_debug(format!(
                    "filter {name}: {} -> {} items",
                    items.len(),
                    retained.len()
                ));
                items = retained;
            }
            Err(e) => {
                ctx.log_error(format!("filter {name} failed, skipping: {e}"));
            }
        }
    }

    trace.count_out = items.len();
    trace.elapsed_ms = started.elapsed().as_millis() as u64;
    (items, trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reco_kernel::error::{BackendError, BackendResult};
    use reco_kernel::traits::CandidateFilter;
    use std::time::Duration;

    struct DropFirst;

    #[async_trait]
    impl CandidateFilter for DropFirst {
        fn name(&self) -> &str {
            "drop-first"
        }
        async fn apply(
            &self,
            items: Vec<Item>,
            _user: &Arc<User>,
            _ctx: &RequestContext,
        ) -> BackendResult<Vec<Item>> {
            Ok(items.into_iter().skip(1).collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl CandidateFilter for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        async fn apply(
            &self,
            _items: Vec<Item>,
            _user: &Arc<User>,
            _ctx: &RequestContext,
        ) -> BackendResult<Vec<Item>> {
            Err(BackendError::Other("backend down".into()))
        }
    }

    fn items(n: usize) -> Vec<Item> {
        (0..n)
            .map(|i| Item::new(format!("i{i}"), "item").with_source("r"))
            .collect()
    }

    #[tokio::test]
    async fn filters_apply_in_order() {
        let registry = Arc::new(Registry::new());
        registry.register_filter("a", "sig", Arc::new(DropFirst));
        registry.register_filter("b", "sig", Arc::new(DropFirst));

        let mut scene = SceneConfig::new("home");
        scene.filter_names = vec!["a".into(), "b".into()];

        let user = Arc::new(User::new("u1"));
        let ctx = Arc::new(RequestContext::new("home", 10, Duration::from_secs(1)));
        let (remaining, trace) = run(&registry, &scene, items(4), &user, &ctx).await;

        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].id, "i2");
        assert_eq!(trace.count_in, 4);
        assert_eq!(trace.count_out, 2);
    }

    #[tokio::test]
    async fn failing_filter_is_skipped() {
        let registry = Arc::new(Registry::new());
        registry.register_filter("broken", "sig", Arc::new(Broken));
        registry.register_filter("ok", "sig", Arc::new(DropFirst));

        let mut scene = SceneConfig::new("home");
        scene.filter_names = vec!["broken".into(), "ok".into()];

        let user = Arc::new(User::new("u1"));
        let ctx = Arc::new(RequestContext::new("home", 10, Duration::from_secs(1)));
        let (remaining, _) = run(&registry, &scene, items(3), &user, &ctx).await;

        // The broken filter contributed nothing; the next one still ran.
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn unknown_filter_is_skipped() {
        let registry = Arc::new(Registry::new());
        let mut scene = SceneConfig::new("home");
        scene.filter_names = vec!["ghost".into()];

        let user = Arc::new(User::new("u1"));
        let ctx = Arc::new(RequestContext::new("home", 10, Duration::from_secs(1)));
        let (remaining, _) = run(&registry, &scene, items(3), &user, &ctx).await;
        assert_eq!(remaining.len(), 3);
    }
}
