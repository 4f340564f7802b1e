use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Lifecycle class of a registry node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Survives session loss and driver restarts.
    Persistent,
    /// Bound to the creating session.
    Ephemeral,
    /// Session-bound node whose name carries a driver-assigned sequence suffix.
    Sequential,
}

impl NodeKind {
    /// Whether the node disappears when the owning session is lost.
    pub fn is_session_bound(self) -> bool {
        !matches!(self, NodeKind::Persistent)
    }
}

/// A stored node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub value: String,
    pub version: u64,
    pub kind: NodeKind,
}

/// Value change on a watched path. `value` is `None` once the node is deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueEvent {
    pub path: String,
    pub value: Option<String>,
    pub version: u64,
}

/// Children change on a watched path, carrying the child list after the change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildrenEvent {
    pub path: String,
    pub children: Vec<String>,
    pub version: u64,
}

/// Receiving half of a driver watch.
///
/// Yields events until the caller drops it or the backend ends the
/// subscription, after which `recv` returns `None`.
#[derive(Debug)]
pub struct Watch<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Watch<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Stream for Watch<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn test_session_bound_kinds() {
        assert!(!NodeKind::Persistent.is_session_bound());
        assert!(NodeKind::Ephemeral.is_session_bound());
        assert!(NodeKind::Sequential.is_session_bound());
    }

    #[tokio::test]
    async fn test_watch_streams_until_sender_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watch = Watch::new(rx);
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        drop(tx);

        assert_eq!(watch.next().await, Some(1));
        assert_eq!(watch.recv().await, Some(2));
        assert_eq!(watch.next().await, None);
    }
}
