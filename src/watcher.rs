//! Rule file watcher used for hot reload.
//!
//! Watches the file's directory rather than the file itself, since editors
//! commonly save by writing a new file and renaming it over the old one.

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;

/// Sends `()` on `reloads` whenever the rule file changes. Stops watching
/// when dropped.
pub struct RuleWatcher {
    _watcher: RecommendedWatcher,
}

impl RuleWatcher {
    pub fn start(rules: &Path, reloads: UnboundedSender<()>) -> Result<Self> {
        let rules = std::path::absolute(rules)
            .with_context(|| format!("Failed to resolve rule file path: {}", rules.display()))?;
        let dir = rules
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = rules.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, file_name.as_deref()) => {
                    let _ = reloads.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "rule watcher error"),
            },
            Config::default(),
        )
        .context("Failed to create rule file watcher")?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch directory: {}", dir.display()))?;

        tracing::info!(path = %rules.display(), "watching rule file");
        Ok(Self { _watcher: watcher })
    }
}

/// Whether `event` changed the file named `file_name`.
fn touches(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    );
    relevant
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == file_name)
}
