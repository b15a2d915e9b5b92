use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

use super::feed::{FeedError, FeedEvent, FeedSubscription, RemoteFeed, path_segments};
use super::tracker::{ChildTracker, get_at, set_at};

struct Listener {
    path: Vec<String>,
    tracker: ChildTracker,
    tx: mpsc::UnboundedSender<FeedEvent>,
}

#[derive(Default)]
struct Tree {
    root: Value,
    listeners: Vec<Listener>,
}

impl Tree {
    fn subtree(&self, path: &[String]) -> Value {
        get_at(&self.root, path).cloned().unwrap_or(Value::Null)
    }

    fn notify(&mut self) {
        let root = &self.root;
        self.listeners.retain_mut(|listener| {
            let snapshot = get_at(root, &listener.path).cloned().unwrap_or(Value::Null);
            for event in listener.tracker.reset(snapshot) {
                if listener.tx.send(event).is_err() {
                    return false;
                }
            }
            !listener.tx.is_closed()
        });
    }
}

/// In-process feed holding a JSON tree. Writes fan out to subscribers as
/// child events, the same way the streaming endpoint reports them.
#[derive(Clone, Default)]
pub struct MemoryFeed {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: Value) -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree {
                root,
                listeners: Vec::new(),
            })),
        }
    }
}

impl RemoteFeed for MemoryFeed {
    async fn once(&self, path: &str) -> Result<Value, FeedError> {
        let tree = self.tree.lock().await;
        Ok(tree.subtree(&path_segments(path)))
    }

    async fn set(&self, path: &str, value: &Value) -> Result<(), FeedError> {
        let mut tree = self.tree.lock().await;
        set_at(&mut tree.root, &path_segments(path), value.clone());
        tree.notify();
        Ok(())
    }

    async fn update(&self, path: &str, value: &Value) -> Result<(), FeedError> {
        let mut tree = self.tree.lock().await;
        let base = path_segments(path);
        if let Value::Object(entries) = value {
            for (key, child) in entries {
                let mut segments = base.clone();
                segments.push(key.clone());
                set_at(&mut tree.root, &segments, child.clone());
            }
        }
        tree.notify();
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), FeedError> {
        let mut tree = self.tree.lock().await;
        set_at(&mut tree.root, &path_segments(path), Value::Null);
        tree.notify();
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<FeedSubscription, FeedError> {
        let mut tree = self.tree.lock().await;
        let segments = path_segments(path);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tracker = ChildTracker::default();
        for event in tracker.reset(tree.subtree(&segments)) {
            tx.send(event).map_err(|_| FeedError::Closed)?;
        }
        tree.listeners.push(Listener {
            path: segments,
            tracker,
            tx,
        });
        Ok(FeedSubscription::new(rx, None))
    }
}
