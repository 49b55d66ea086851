//! Per-request context threaded through every pipeline phase.
//!
//! Carries the request identifiers, the deadline, the per-request log and
//! a concurrent scratch bag. Created at request entry, dropped after the
//! response is serialized.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::item::PropertyValue;

/// Severity of a per-request log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// One retained log line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Shared per-request state.
///
/// The log is append-only and consistent with the causal order of phases;
/// the scratch bag supports concurrent set/get from recall tasks. Both are
/// guarded internally, so the context is shared by plain reference (or
/// `Arc`) without further locking by callers.
#[derive(Debug)]
pub struct RequestContext {
    request_id: String,
    scene_id: String,
    category: String,
    size: usize,
    debug: bool,
    variant: Option<String>,
    params: HashMap<String, PropertyValue>,
    started: Instant,
    deadline: Instant,
    log: Mutex<Vec<LogEntry>>,
    bag: RwLock<HashMap<String, PropertyValue>>,
    invariant_violations: AtomicU32,
}

impl RequestContext {
    /// Create a context with a fresh unique request id.
    pub fn new(scene_id: impl Into<String>, size: usize, budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            request_id: Uuid::new_v4().to_string(),
            scene_id: scene_id.into(),
            category: "default".to_string(),
            size,
            debug: false,
            variant: None,
            params: HashMap::new(),
            started,
            deadline: started + budget,
            log: Mutex::new(Vec::new()),
            bag: RwLock::new(HashMap::new()),
            invariant_violations: AtomicU32::new(0),
        }
    }

    /// Set the scene category (defaults to `"default"`).
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Enable debug mode: debug log lines are retained and the response
    /// carries a trace payload.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Attach the already-resolved experiment variant.
    pub fn with_variant(mut self, variant: Option<String>) -> Self {
        self.variant = variant;
        self
    }

    /// Attach the request parameter map.
    pub fn with_params(mut self, params: HashMap<String, PropertyValue>) -> Self {
        self.params = params;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn scene_id(&self) -> &str {
        &self.scene_id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Requested item count.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    pub fn param(&self, key: &str) -> Option<&PropertyValue> {
        self.params.get(key)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the request-level deadline, zero when exhausted.
    pub fn deadline_remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline_remaining().is_zero()
    }

    /// The smaller of a phase budget and the remaining request budget.
    pub fn phase_budget(&self, phase_ms: u64) -> Duration {
        Duration::from_millis(phase_ms).min(self.deadline_remaining())
    }

    // ── scratch bag ─────────────────────────────────────────────────────

    pub fn set(&self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.bag.write().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<PropertyValue> {
        self.bag.read().get(key).cloned()
    }

    // ── per-request log ─────────────────────────────────────────────────

    /// Append a log line, mirroring it to `tracing` at the same level.
    ///
    /// Debug lines are retained only when the debug flag is set; all other
    /// levels are always retained.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => {
                tracing::debug!(request_id = %self.request_id, "{message}");
                if !self.debug {
                    return;
                }
            }
            LogLevel::Info => tracing::info!(request_id = %self.request_id, "{message}"),
            LogLevel::Warn => tracing::warn!(request_id = %self.request_id, "{message}"),
            LogLevel::Error => tracing::error!(request_id = %self.request_id, "{message}"),
        }
        self.log.lock().push(LogEntry { level, message });
    }

    pub fn log_debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn log_warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Count a clamped invariant violation (non-finite score and the like).
    pub fn count_invariant_violation(&self) {
        self.invariant_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invariant_violations(&self) -> u32 {
        self.invariant_violations.load(Ordering::Relaxed)
    }

    /// Render the retained log for the response payload.
    pub fn render_log(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .map(|e| format!("[{}] {}", e.level.as_str(), e.message))
            .collect()
    }
}
