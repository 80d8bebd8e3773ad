//! Rerun a pipeline when project files change.

use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, warn};

use kiln_core::WatchConfig;

/// Decides which changed paths trigger a rerun.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    extensions: Vec<String>,
    /// Output directories; changes there come from the pipeline itself.
    ignored: Vec<PathBuf>,
}

impl ChangeFilter {
    pub fn new(extensions: Vec<String>, ignored: Vec<PathBuf>) -> Self {
        Self { extensions, ignored }
    }

    pub fn matches(&self, path: &Path) -> bool {
        if self.ignored.iter().any(|dir| path.starts_with(dir)) {
            return false;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|p| p == ext))
    }
}

pub struct ProjectWatcher {
    paths: Vec<PathBuf>,
    filter: ChangeFilter,
    debounce: Duration,
}

impl ProjectWatcher {
    pub fn new(root: &Path, config: &WatchConfig, ignored: Vec<PathBuf>) -> Self {
        Self {
            paths: config.paths.iter().map(|p| root.join(p)).collect(),
            filter: ChangeFilter::new(config.extensions.clone(), ignored),
            debounce: Duration::from_millis(config.debounce_ms),
        }
    }

    /// Start watching. Matching paths arrive on the returned channel for as
    /// long as the returned watcher is alive.
    pub fn start(&self) -> notify::Result<(RecommendedWatcher, UnboundedReceiver<PathBuf>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let filter = self.filter.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() => {
                    for path in event.paths {
                        if filter.matches(&path) {
                            let _ = tx.send(path);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "File watcher error"),
            },
            Config::default(),
        )?;

        let mut watched = 0;
        for path in &self.paths {
            if path.exists() {
                watcher.watch(path, RecursiveMode::Recursive)?;
                watched += 1;
            } else {
                debug!(path = %path.display(), "Watch path does not exist, skipping");
            }
        }
        if watched == 0 {
            warn!("None of the watch paths exist");
        }
        Ok((watcher, rx))
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }
}

/// Wait for a change, then keep collecting until the debounce window passes
/// without another one. `None` once the channel is closed.
pub async fn next_batch(rx: &mut UnboundedReceiver<PathBuf>, debounce: Duration) -> Option<Vec<PathBuf>> {
    let first = rx.recv().await?;
    let mut batch = vec![first];
    loop {
        match tokio::time::timeout(debounce, rx.recv()).await {
            Ok(Some(path)) => {
                if !batch.contains(&path) {
                    batch.push(path);
                }
            }
            Ok(None) | Err(_) => break,
        }
    }
    Some(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_extensions_and_ignored_dirs() {
        let filter = ChangeFilter::new(
            vec!["js".to_string(), "css".to_string()],
            vec![PathBuf::from("/repo/dist"), PathBuf::from("/repo/build")],
        );
        assert!(filter.matches(Path::new("/repo/src/core.js")));
        assert!(filter.matches(Path::new("/repo/src/qunit.css")));
        assert!(!filter.matches(Path::new("/repo/src/notes.md")));
        assert!(!filter.matches(Path::new("/repo/src/Makefile")));
        assert!(!filter.matches(Path::new("/repo/dist/qunit.js")));
        assert!(!filter.matches(Path::new("/repo/build/instrumented/dist/qunit.js")));
    }

    #[test]
    fn test_watcher_resolves_paths_against_root() {
        let watcher = ProjectWatcher::new(Path::new("/repo"), &WatchConfig::default(), vec![]);
        assert_eq!(watcher.paths[0], PathBuf::from("/repo/src"));
        assert_eq!(watcher.debounce(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_next_batch_collects_burst() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(PathBuf::from("a.js")).unwrap();
        tx.send(PathBuf::from("b.js")).unwrap();
        tx.send(PathBuf::from("a.js")).unwrap();

        let batch = next_batch(&mut rx, Duration::from_millis(20)).await.unwrap();
        assert_eq!(batch, vec![PathBuf::from("a.js"), PathBuf::from("b.js")]);

        drop(tx);
        assert!(next_batch(&mut rx, Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_start_reports_created_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let config = WatchConfig {
            paths: vec![PathBuf::from("src")],
            extensions: vec!["js".to_string()],
            debounce_ms: 50,
        };
        let watcher = ProjectWatcher::new(dir.path(), &config, vec![]);
        let (_guard, mut rx) = watcher.start().unwrap();

        std::fs::write(dir.path().join("src/core.js"), "var a;").unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(5), next_batch(&mut rx, watcher.debounce()))
            .await
            .expect("change not reported")
            .unwrap();
        assert!(batch.iter().any(|p| p.ends_with("core.js")));
    }
}
