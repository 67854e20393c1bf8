//! Directory watchers
//!
//! Each watched directory gets a notify watcher whose callback classifies
//! raw events into [`WatchEvent`]s and pushes them onto an unbounded queue.
//! A single consumer loop drains the queue in arrival order, sleeping for the
//! debounce delay before handling each event.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use wildmatch::WildMatch;

use crate::event::{EventPublisher, HostEvent};

/// A classified file-system change
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WatchEvent {
    Created(PathBuf),
    Deleted(PathBuf),
}

impl WatchEvent {
    pub(crate) fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(p) | WatchEvent::Deleted(p) => p,
        }
    }
}

/// Which file names a watcher cares about
#[derive(Debug, Clone)]
pub(crate) enum WatchFilter {
    /// Glob on the file name
    Pattern(String),
    /// File name ends with `.{suffix}`
    Suffix(String),
}

impl WatchFilter {
    pub(crate) fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        match self {
            WatchFilter::Pattern(pattern) => WildMatch::new(pattern).matches(name),
            WatchFilter::Suffix(suffix) => name
                .strip_suffix(suffix.as_str())
                .is_some_and(|rest| rest.len() > 1 && rest.ends_with('.')),
        }
    }
}

/// Classify a notify event into zero or more watch events
pub(crate) fn classify(event: &Event, filter: &WatchFilter) -> Vec<WatchEvent> {
    let classified: Vec<WatchEvent> = match &event.kind {
        EventKind::Create(_) => event.paths.iter().cloned().map(WatchEvent::Created).collect(),
        EventKind::Remove(_) => event.paths.iter().cloned().map(WatchEvent::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().cloned().map(WatchEvent::Deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().cloned().map(WatchEvent::Created).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::new();
            if let Some(from) = event.paths.first() {
                out.push(WatchEvent::Deleted(from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                out.push(WatchEvent::Created(to.clone()));
            }
            out
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                if p.exists() {
                    WatchEvent::Created(p.clone())
                } else {
                    WatchEvent::Deleted(p.clone())
                }
            })
            .collect(),
        _ => Vec::new(),
    };

    classified
        .into_iter()
        .filter(|e| filter.matches(e.path()))
        .collect()
}

/// Start watching `dir` (non-recursive)
pub(crate) fn watch_dir(
    dir: &Path,
    filter: WatchFilter,
    tx: mpsc::UnboundedSender<WatchEvent>,
    events: EventPublisher,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        match res {
            Ok(event) => {
                for change in classify(&event, &filter) {
                    debug!(?change, "File change detected");
                    let _ = tx.send(change);
                }
            }
            Err(e) => {
                error!("File watcher error: {}", e);
                events.publish(HostEvent::WatcherError {
                    message: e.to_string(),
                });
            }
        }
    })?;

    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    info!("Watching directory: {}", dir.display());
    Ok(watcher)
}

/// Spawn the single consumer loop of a watcher queue
///
/// The notify watcher is moved into the task so it stays alive exactly as
/// long as the loop.
pub(crate) fn spawn_consumer<F, Fut>(
    name: &'static str,
    watcher: Option<RecommendedWatcher>,
    mut rx: mpsc::UnboundedReceiver<WatchEvent>,
    token: CancellationToken,
    debounce: Duration,
    handler: F,
) -> JoinHandle<()>
where
    F: Fn(WatchEvent) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let _watcher = watcher;
        debug!(watcher = name, "Watcher loop started");

        loop {
            let change = tokio::select! {
                _ = token.cancelled() => break,
                change = rx.recv() => match change {
                    Some(change) => change,
                    None => break,
                },
            };

            // Built before the debounce so the handler itself is never held across an await
            let work = handler(change);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = async move {
                    tokio::time::sleep(debounce).await;
                    work.await;
                } => {}
            }
        }

        debug!(watcher = name, "Watcher loop stopped");
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_filters() {
        let pattern = WatchFilter::Pattern("Snet.*".into());
        assert!(pattern.matches(Path::new("/lib/Snet.Mq.Kafka.dll")));
        assert!(!pattern.matches(Path::new("/lib/other.dll")));

        let suffix = WatchFilter::Suffix("config.json".into());
        assert!(suffix.matches(Path::new("/cfg/A.B.1.config.json")));
        assert!(!suffix.matches(Path::new("/cfg/config.json")));
        assert!(!suffix.matches(Path::new("/cfg/A.B.1.myconfig.json")));
    }

    #[test]
    fn test_classify_kinds() {
        let filter = WatchFilter::Suffix("config.json".into());

        let created = classify(
            &event(EventKind::Create(CreateKind::File), &["/c/A.1.config.json"]),
            &filter,
        );
        assert_eq!(created, vec![WatchEvent::Created("/c/A.1.config.json".into())]);

        let removed = classify(
            &event(EventKind::Remove(RemoveKind::File), &["/c/A.1.config.json", "/c/x.txt"]),
            &filter,
        );
        assert_eq!(removed, vec![WatchEvent::Deleted("/c/A.1.config.json".into())]);

        let renamed = classify(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/c/A.1.config.json", "/c/A.2.config.json"],
            ),
            &filter,
        );
        assert_eq!(
            renamed,
            vec![
                WatchEvent::Deleted("/c/A.1.config.json".into()),
                WatchEvent::Created("/c/A.2.config.json".into()),
            ]
        );

        let modified = classify(
            &event(
                EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)),
                &["/c/A.1.config.json"],
            ),
            &filter,
        );
        assert!(modified.is_empty());
    }

    #[tokio::test]
    async fn test_consumer_handles_in_order_and_stops() {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));

        let handle = {
            let seen = Arc::clone(&seen);
            let count = Arc::clone(&count);
            spawn_consumer("test", None, rx, token.clone(), Duration::from_millis(1), move |e| {
                let seen = Arc::clone(&seen);
                let count = Arc::clone(&count);
                async move {
                    seen.lock().push(e);
                    count.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tx.send(WatchEvent::Created("/a".into())).unwrap();
        tx.send(WatchEvent::Deleted("/a".into())).unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while count.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        token.cancel();
        handle.await.unwrap();
        assert_eq!(
            *seen.lock(),
            vec![WatchEvent::Created("/a".into()), WatchEvent::Deleted("/a".into())]
        );
    }

    #[tokio::test]
    async fn test_consumer_accepts_handler_that_is_not_sync() {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));

        // `Cell` makes the closure `Send` but not `Sync`
        let calls = std::cell::Cell::new(0usize);
        let handle = {
            let count = Arc::clone(&count);
            spawn_consumer("unsync", None, rx, token.clone(), Duration::from_millis(1), move |_| {
                calls.set(calls.get() + 1);
                let count = Arc::clone(&count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tx.send(WatchEvent::Created("/b".into())).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while count.load(Ordering::SeqCst) < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        token.cancel();
        handle.await.unwrap();
    }
}
