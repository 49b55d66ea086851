//! Config-file watcher driving hot reload.
//!
//! Watches the directory holding the config file, debounces the editor /
//! deploy-tool write storms, and calls [`Engine::reload_from_path`] when
//! the file settles. Reload failures keep the previous configuration and
//! are logged; the watcher keeps running.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::pipeline::Engine;

/// Watch configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Quiet period before a change triggers a reload.
    pub debounce: Duration,
    /// Poll fallback interval for platforms without native events.
    pub poll_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            poll_interval: Duration::from_millis(1_000),
        }
    }
}

/// Handle keeping the watch task and OS watcher alive.
///
/// Dropping the handle stops watching; in-flight requests are unaffected.
pub struct WatchHandle {
    shutdown_tx: mpsc::Sender<()>,
    _watcher: RecommendedWatcher,
}

impl WatchHandle {
    /// Stop the watch task.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Start watching `config_path` and reloading `engine` on change.
pub fn spawn_config_watch(
    engine: Arc<Engine>,
    config_path: impl Into<PathBuf>,
    watch_config: WatchConfig,
) -> Result<WatchHandle, notify::Error> {
    let config_path: PathBuf = config_path.into();
    // Watch the parent: atomic-rename deploys replace the file node.
    let watch_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let (event_tx, mut event_rx) = mpsc::channel::<Event>(256);
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let notify_config = Config::default().with_poll_interval(watch_config.poll_interval);
    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| {
            if let Ok(event) = result {
                let _ = event_tx.blocking_send(event);
            }
        },
        notify_config,
    )?;
    watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;
    info!(path = %config_path.display(), "watching recommend config");

    tokio::spawn(async move {
        let mut last_reload: Option<Instant> = None;
        loop {
            tokio::select! {
                Some(event) = event_rx.recv() => {
                    if !touches(&event, &config_path) {
                        continue;
                    }
                    if last_reload.is_some_and(|t| t.elapsed() < watch_config.debounce) {
                        debug!("debounced config change");
                        continue;
                    }
                    // Let the writer finish before parsing.
                    tokio::time::sleep(watch_config.debounce).await;
                    while event_rx.try_recv().is_ok() {}
                    last_reload = Some(Instant::now());

                    let Some(path) = config_path.to_str() else {
                        error!("config path is not valid UTF-8, stopping watch");
                        return;
                    };
                    match engine.reload_from_path(path) {
                        Ok(report) if report.is_clean() => {
                            info!(built = report.built, skipped = report.skipped, "config reloaded");
                        }
                        Ok(report) => {
                            warn!(
                                failed = report.failures.len(),
                                "config reloaded with failures; previous instances retained"
                            );
                        }
                        Err(e) => {
                            error!("config reload failed, previous config retained: {e:?}");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("config watch shutting down");
                    return;
                }
                else => return,
            }
        }
    });

    Ok(WatchHandle {
        shutdown_tx,
        _watcher: watcher,
    })
}

/// Does this filesystem event concern the watched file?
fn touches(event: &Event, config_path: &Path) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == config_path.file_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::EngineFactory;

    fn write_config(dir: &Path, final_size: usize) -> PathBuf {
        let path = dir.join("recommend.yaml");
        let yaml = format!(
            r#"
scenes:
  - scene_id: home
    recall_names: [pop]
    final_size: {final_size}
recalls:
  - name: pop
    type: popularity
    dao_name: pop_table
daos:
  - name: pop_table
    type: memory
    data:
      popularity:
        - {{ id: a, score: 0.9 }}
"#
        );
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[tokio::test]
    async fn watcher_reloads_after_file_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), 3);

        let engine = Arc::new(
            Engine::from_config_path(path.to_str().unwrap(), EngineFactory::default()).unwrap(),
        );
        assert_eq!(engine.config().scenes[0].final_size, 3);

        let handle = spawn_config_watch(
            Arc::clone(&engine),
            &path,
            WatchConfig {
                debounce: Duration::from_millis(50),
                poll_interval: Duration::from_millis(50),
            },
        )
        .unwrap();

        write_config(dir.path(), 7);

        // The watcher needs a few polls on platforms without native events.
        let mut reloaded = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if engine.config().scenes[0].final_size == 7 {
                reloaded = true;
                break;
            }
        }
        handle.stop().await;
        assert!(reloaded, "config change never picked up");
    }

    #[tokio::test]
    async fn broken_config_file_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), 3);
        let engine = Arc::new(
            Engine::from_config_path(path.to_str().unwrap(), EngineFactory::default()).unwrap(),
        );

        std::fs::write(&path, "scenes: [").unwrap();
        assert!(engine.reload_from_path(path.to_str().unwrap()).is_err());
        assert_eq!(engine.config().scenes[0].final_size, 3);
    }
}
