use std::future::Future;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    ChildAdded { key: String, value: Value },
    ChildChanged { key: String, value: Value },
    /// Carries the last value the feed knew for the removed child.
    ChildRemoved { key: String, value: Value },
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("firebase error: {0}")]
    Firebase(#[from] fleetsync_core::FirebaseError),
    #[error("feed closed")]
    Closed,
}

/// Child events for one subscribed path. Dropping it stops the producer.
pub struct FeedSubscription {
    events: mpsc::UnboundedReceiver<FeedEvent>,
    producer: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn new(
        events: mpsc::UnboundedReceiver<FeedEvent>,
        producer: Option<JoinHandle<()>>,
    ) -> Self {
        Self { events, producer }
    }

    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

/// Path-addressed hierarchical data source the engine mirrors from.
pub trait RemoteFeed: Send + Sync + 'static {
    /// Reads the full subtree at `path`; missing nodes read as `Value::Null`.
    fn once(&self, path: &str) -> impl Future<Output = Result<Value, FeedError>> + Send;

    fn set(&self, path: &str, value: &Value) -> impl Future<Output = Result<(), FeedError>> + Send;

    /// Merges the keys of `value` into the node at `path`.
    fn update(
        &self,
        path: &str,
        value: &Value,
    ) -> impl Future<Output = Result<(), FeedError>> + Send;

    fn remove(&self, path: &str) -> impl Future<Output = Result<(), FeedError>> + Send;

    /// Subscribes to added/changed/removed events for the direct children of
    /// `path`. Existing children are reported as added first.
    fn subscribe(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<FeedSubscription, FeedError>> + Send;
}

pub(crate) fn path_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}
