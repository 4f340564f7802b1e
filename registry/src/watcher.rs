use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{ChildrenEvent, Error, Registry, Watch};

const EVENT_BUFFER: usize = 16;
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Latest children of one watched path.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildrenChange {
    pub path: String,
    pub children: Vec<String>,
}

/// Merges children watches on several paths into one cancellable channel.
///
/// Each path first yields its current children, then one item per observed
/// change. When the backend drops a subscription the watcher re-subscribes
/// and re-reads the children, so consumers converge on the latest list even
/// if intermediate states were missed. After [`ChildWatcher::close`] (or drop)
/// every forwarding task stops and the channel closes.
pub struct ChildWatcher {
    registry: Arc<dyn Registry>,
    paths: Vec<String>,
    cancel_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    reconnect_delay: Duration,
}

impl ChildWatcher {
    pub fn new(registry: Arc<dyn Registry>, paths: Vec<String>) -> Self {
        Self {
            registry,
            paths,
            cancel_token: CancellationToken::new(),
            handles: Vec::new(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Delay between re-subscription attempts after a failed watch.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Subscribe to every path and start forwarding.
    ///
    /// # Errors
    ///
    /// Fails if the watcher was already started or closed, or if any
    /// subscription cannot be opened. Nothing is forwarded in that case.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<ChildrenChange>, Error> {
        if !self.handles.is_empty() || self.cancel_token.is_cancelled() {
            return Err(Error::InvalidArgument("watcher already started".into()));
        }

        let mut subscriptions = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            let watch = self.registry.watch_children(path).await?;
            let (children, _) = self.registry.get_children(path).await?;
            subscriptions.push((path.clone(), watch, children));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        for (path, watch, children) in subscriptions {
            let task = PathTask {
                registry: self.registry.clone(),
                path,
                tx: tx.clone(),
                cancel_token: self.cancel_token.clone(),
                reconnect_delay: self.reconnect_delay,
            };
            self.handles.push(tokio::spawn(task.run(watch, children)));
        }

        tracing::debug!(paths = ?self.paths, "Children watcher started");
        Ok(rx)
    }

    /// Stop every subscription. Safe to call more than once.
    pub fn close(&self) {
        if !self.cancel_token.is_cancelled() {
            tracing::debug!(paths = ?self.paths, "Children watcher closing");
        }
        self.cancel_token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for ChildWatcher {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

struct PathTask {
    registry: Arc<dyn Registry>,
    path: String,
    tx: mpsc::Sender<ChildrenChange>,
    cancel_token: CancellationToken,
    reconnect_delay: Duration,
}

impl PathTask {
    async fn run(self, mut watch: Watch<ChildrenEvent>, initial: Vec<String>) {
        let mut last = initial.clone();
        if !self.deliver(initial).await {
            return;
        }

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,

                event = watch.recv() => {
                    let children = match event {
                        Some(event) => event.children,
                        None => match self.resubscribe().await {
                            Some((renewed, children)) => {
                                watch = renewed;
                                children
                            }
                            None => break,
                        },
                    };
                    if children == last {
                        continue;
                    }
                    last = children.clone();
                    if !self.deliver(children).await {
                        break;
                    }
                }
            }
        }
        tracing::debug!(path = %self.path, "Children watch task shutting down");
    }

    /// Re-open the subscription after the backend dropped it. `None` once the
    /// watcher is cancelled or the registry is closed.
    async fn resubscribe(&self) -> Option<(Watch<ChildrenEvent>, Vec<String>)> {
        loop {
            if self.cancel_token.is_cancelled() {
                return None;
            }
            let result = match self.registry.watch_children(&self.path).await {
                Ok(watch) => self
                    .registry
                    .get_children(&self.path)
                    .await
                    .map(|(children, _)| (watch, children)),
                Err(e) => Err(e),
            };
            match result {
                Ok(renewed) => {
                    tracing::info!(path = %self.path, "Children watch re-established");
                    return Some(renewed);
                }
                Err(Error::Closed) => {
                    tracing::debug!(path = %self.path, "Registry closed, ending children watch");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(path = %self.path, "Children watch lost, retrying: {}", e);
                    tokio::select! {
                        _ = self.cancel_token.cancelled() => return None,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }
    }

    async fn deliver(&self, children: Vec<String>) -> bool {
        let change = ChildrenChange {
            path: self.path.clone(),
            children,
        };
        tokio::select! {
            _ = self.cancel_token.cancelled() => false,
            sent = self.tx.send(change) => sent.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryRegistry;

    async fn next(rx: &mut mpsc::Receiver<ChildrenChange>) -> Option<ChildrenChange> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Timeout waiting for children change")
    }

    #[tokio::test]
    async fn test_initial_snapshot_then_changes() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.create_temp_node("svc/a", "").await.unwrap();

        let mut watcher = ChildWatcher::new(registry.clone(), vec!["svc".into()]);
        let mut rx = watcher.start().await.unwrap();

        assert_eq!(next(&mut rx).await.unwrap().children, vec!["a".to_string()]);

        registry.create_temp_node("svc/b", "").await.unwrap();
        let change = next(&mut rx).await.unwrap();
        assert_eq!(change.path, "svc");
        assert_eq!(change.children, vec!["a".to_string(), "b".to_string()]);

        watcher.close();
    }

    #[tokio::test]
    async fn test_merges_multiple_paths() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut watcher = ChildWatcher::new(registry.clone(), vec!["x".into(), "y".into()]);
        let mut rx = watcher.start().await.unwrap();

        // two initial snapshots, in either order
        let mut seen = vec![next(&mut rx).await.unwrap().path, next(&mut rx).await.unwrap().path];
        seen.sort();
        assert_eq!(seen, vec!["x".to_string(), "y".to_string()]);

        registry.create_temp_node("y/1", "").await.unwrap();
        let change = next(&mut rx).await.unwrap();
        assert_eq!(change.path, "y");
        assert_eq!(change.children, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_close_terminates_channel() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut watcher = ChildWatcher::new(registry.clone(), vec!["svc".into()]);
        let mut rx = watcher.start().await.unwrap();
        next(&mut rx).await.unwrap();

        watcher.close();
        watcher.close();
        assert!(watcher.is_closed());
        assert!(next(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut watcher = ChildWatcher::new(registry, vec!["svc".into()]);
        let _rx = watcher.start().await.unwrap();
        assert!(matches!(watcher.start().await, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_resubscribes_after_backend_drop() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut watcher = ChildWatcher::new(registry.clone(), vec!["svc".into()])
            .with_reconnect_delay(Duration::from_millis(10));
        let mut rx = watcher.start().await.unwrap();
        assert!(next(&mut rx).await.unwrap().children.is_empty());

        registry.drop_watches().await;
        registry.create_temp_node("svc/late", "").await.unwrap();

        // Either the re-read after re-subscribing or the renewed watch reports it.
        let change = next(&mut rx).await.unwrap();
        assert_eq!(change.children, vec!["late".to_string()]);
        watcher.close();
    }

    #[tokio::test]
    async fn test_registry_close_ends_stream() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut watcher = ChildWatcher::new(registry.clone(), vec!["svc".into()]);
        let mut rx = watcher.start().await.unwrap();
        next(&mut rx).await.unwrap();

        registry.close().await.unwrap();
        assert!(next(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_start_fails_on_closed_registry() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.close().await.unwrap();
        let mut watcher = ChildWatcher::new(registry, vec!["svc".into()]);
        assert!(matches!(watcher.start().await, Err(Error::Closed)));
    }
}
