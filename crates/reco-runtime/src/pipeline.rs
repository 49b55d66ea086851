//! The pipeline orchestrator.
//!
//! [`Engine`] owns the registry, the current configuration snapshot and
//! the admission bound. One call to [`Engine::recommend`] runs the four
//! phases in strict order under the request deadline and shapes the
//! response, degrading instead of failing wherever the error policy
//! allows it.

use error_stack::ResultExt;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use reco_backends::AlgorithmDispatcher;
use reco_kernel::Registry;
use reco_kernel::api::{
    DebugTrace, ItemPayload, RecommendRequest, RecommendResponse, codes,
};
use reco_kernel::config::RecommendConfig;
use reco_kernel::context::RequestContext;
use reco_kernel::error::{EngineError, EngineResult};
use reco_kernel::registry::ReloadReport;
use reco_kernel::user::User;

use crate::factory::EngineFactory;
use crate::{filter, rank, recall, sort};

/// The per-request recommendation engine.
pub struct Engine {
    registry: Arc<Registry>,
    dispatcher: AlgorithmDispatcher,
    factory: EngineFactory,
    config: RwLock<Arc<RecommendConfig>>,
    admission: Semaphore,
}

impl Engine {
    /// Build an engine from an already-parsed configuration tree.
    ///
    /// Startup semantics: validation and every instance construction must
    /// succeed, otherwise the error is fatal and the caller should exit
    /// non-zero.
    pub fn new(cfg: RecommendConfig, factory: EngineFactory) -> EngineResult<Self> {
        cfg.validate().map_err(EngineError::from)?;

        let registry = Arc::new(Registry::new());
        let report = registry
            .reload_from_config(&cfg, &factory)
            .map_err(EngineError::from)?;
        if !report.is_clean() {
            let detail = report
                .failures
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(error_stack::Report::new(EngineError::Internal(format!(
                "instance construction failed at startup: {detail}"
            ))));
        }

        let max_in_flight = cfg.engine.max_in_flight.max(1);
        info!(
            scenes = cfg.scenes.len(),
            recalls = cfg.recalls.len(),
            algorithms = cfg.algorithms.len(),
            max_in_flight,
            "engine ready"
        );
        Ok(Self {
            dispatcher: AlgorithmDispatcher::new(Arc::clone(&registry)),
            registry,
            factory,
            config: RwLock::new(Arc::new(cfg)),
            admission: Semaphore::new(max_in_flight),
        })
    }

    /// Build an engine from a configuration file path.
    pub fn from_config_path(path: &str, factory: EngineFactory) -> EngineResult<Self> {
        let cfg = reco_kernel::config::load_recommend_config(path)
            .map_err(EngineError::from)
            .attach_printable_lazy(|| format!("loading recommend config from {path}"))?;
        Self::new(cfg, factory)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Snapshot of the active configuration.
    pub fn config(&self) -> Arc<RecommendConfig> {
        Arc::clone(&self.config.read())
    }

    /// Apply a new configuration tree.
    ///
    /// Reload semantics: a validation error rejects the tree outright and
    /// the previous configuration stays active. Per-instance construction
    /// failures keep the previous instance and are reported, not fatal.
    pub fn reload(&self, cfg: RecommendConfig) -> EngineResult<ReloadReport> {
        cfg.validate().map_err(EngineError::from)?;
        let report = self
            .registry
            .reload_from_config(&cfg, &self.factory)
            .map_err(EngineError::from)?;
        for failure in &report.failures {
            warn!(%failure, "reload kept previous instance");
        }
        *self.config.write() = Arc::new(cfg);
        Ok(report)
    }

    /// Reload from a configuration file path.
    pub fn reload_from_path(&self, path: &str) -> EngineResult<ReloadReport> {
        let cfg = reco_kernel::config::load_recommend_config(path)
            .map_err(EngineError::from)
            .attach_printable_lazy(|| format!("reloading recommend config from {path}"))?;
        self.reload(cfg)
    }

    /// Serve one request.
    pub async fn recommend(&self, request: RecommendRequest) -> RecommendResponse {
        // Admission: reject before any phase runs.
        let Ok(_permit) = self.admission.try_acquire() else {
            return RecommendResponse::error(
                Uuid::new_v4().to_string(),
                codes::UNAVAILABLE,
                "engine at capacity",
            );
        };

        let cfg = self.config();
        let category = request.category.as_deref().unwrap_or("default");

        let Some(scene) = cfg.scene(&request.scene_id, category) else {
            return RecommendResponse::error(
                Uuid::new_v4().to_string(),
                codes::BAD_REQUEST,
                format!("no scene {:?} (category {category:?})", request.scene_id),
            );
        };
        if request.uid.is_empty() {
            return RecommendResponse::error(
                Uuid::new_v4().to_string(),
                codes::BAD_REQUEST,
                "uid is required",
            );
        }

        let size = request
            .size
            .unwrap_or(cfg.engine.default_size)
            .min(scene.final_size);
        let ctx = Arc::new(
            RequestContext::new(
                &request.scene_id,
                size,
                Duration::from_millis(cfg.engine.request_timeout_ms),
            )
            .with_category(category)
            .with_debug(request.debug)
            .with_variant(request.variant.clone())
            .with_params(request.features.clone()),
        );
        let user = Arc::new(User::with_properties(&request.uid, request.features));

        ctx.log_debug(format!(
            "serving scene {} for user {}",
            scene.key(),
            user.uid()
        ));

        let mut phases = Vec::with_capacity(4);

        let (items, trace) = recall::run(&self.registry, scene, &user, &ctx).await;
        phases.push(trace);

        // Strict phase order; whatever survives an exhausted deadline
        // goes straight to the final ordering.
        let items = if ctx.deadline_exceeded() {
            ctx.log_warn("request deadline exhausted after recall");
            items
        } else {
            let (items, trace) = filter::run(&self.registry, scene, items, &user, &ctx).await;
            phases.push(trace);
            items
        };

        let items = if ctx.deadline_exceeded() {
            ctx.log_warn("request deadline exhausted before rank");
            items
        } else {
            let (items, trace) = rank::run(
                &self.registry,
                &self.dispatcher,
                scene,
                items,
                &user,
                &ctx,
            )
            .await;
            phases.push(trace);
            items
        };

        let (items, trace) = sort::run(&self.registry, scene, items, &ctx, size);
        phases.push(trace);

        let payload: Vec<ItemPayload> = items.into_iter().map(ItemPayload::from).collect();
        let mut response = RecommendResponse::success(ctx.request_id(), payload);
        if ctx.debug() {
            response = response.with_debug(DebugTrace {
                variant: ctx.variant().map(str::to_string),
                phases,
                log: ctx.render_log(),
                invariant_violations: ctx.invariant_violations(),
            });
        }
        response
    }
}
