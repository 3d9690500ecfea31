//! Spec-file watcher driving hot reload.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use mock_core::endpoints_from_file;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{error, info, warn};

use crate::server::MockServer;

/// Watch the spec file's *parent directory* and reload the routing table on
/// every write or create event for the file's basename. Watching the
/// directory rather than the file survives editors that save via
/// rename-and-replace, which would silently drop a direct file watch.
///
/// A failed re-parse is logged and the previous routes stay live. The
/// returned watcher must be kept alive for the server's lifetime; dropping
/// it stops the watch.
pub fn watch_spec(spec_path: &Path, server: Arc<MockServer>) -> anyhow::Result<RecommendedWatcher> {
    let spec_path = spec_path.to_path_buf();
    let basename = spec_path
        .file_name()
        .map(|name| name.to_os_string())
        .with_context(|| format!("{} has no file name", spec_path.display()))?;
    let parent = match spec_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };

    let watched = spec_path.clone();
    let mut watcher =
        notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                let written = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_));
                let ours = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(basename.as_os_str()));
                if written && ours {
                    match endpoints_from_file(&watched) {
                        Ok(endpoints) => {
                            info!("{} changed, reloading routes", watched.display());
                            server.install(endpoints);
                        }
                        Err(err) => {
                            error!("reload failed, keeping previous routes: {err}");
                        }
                    }
                }
            }
            Err(err) => warn!("watch error: {err}"),
        })?;

    watcher
        .watch(&parent, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", parent.display()))?;

    Ok(watcher)
}
