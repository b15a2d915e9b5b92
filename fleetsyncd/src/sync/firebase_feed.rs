use std::time::Duration;

use fleetsync_core::{EventStream, FirebaseClient, StreamEvent};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::feed::{FeedError, FeedEvent, FeedSubscription, RemoteFeed};
use super::tracker::ChildTracker;

pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// [`RemoteFeed`] backed by a Firebase Realtime Database.
#[derive(Clone)]
pub struct FirebaseFeed {
    client: FirebaseClient,
    backoff: Backoff,
}

impl FirebaseFeed {
    pub fn new(client: FirebaseClient) -> Self {
        Self {
            client,
            backoff: Backoff::new(Duration::from_secs(1), MAX_RECONNECT_DELAY, true),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl RemoteFeed for FirebaseFeed {
    async fn once(&self, path: &str) -> Result<Value, FeedError> {
        Ok(self.client.get(path).await?)
    }

    async fn set(&self, path: &str, value: &Value) -> Result<(), FeedError> {
        self.client.put(path, value).await?;
        Ok(())
    }

    async fn update(&self, path: &str, value: &Value) -> Result<(), FeedError> {
        self.client.patch(path, value).await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), FeedError> {
        self.client.delete(path).await?;
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<FeedSubscription, FeedError> {
        let stream = self.client.stream(path).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let producer = tokio::spawn(pump_stream(
            self.client.clone(),
            path.to_string(),
            stream,
            tx,
            self.backoff,
        ));
        Ok(FeedSubscription::new(rx, Some(producer)))
    }
}

enum StreamEnd {
    Dropped,
    Fatal,
}

async fn pump_stream(
    client: FirebaseClient,
    path: String,
    mut stream: EventStream,
    tx: mpsc::UnboundedSender<FeedEvent>,
    mut backoff: Backoff,
) {
    let mut tracker = ChildTracker::default();
    loop {
        match drain(&path, &mut stream, &mut tracker, &tx, &mut backoff).await {
            StreamEnd::Fatal => return,
            StreamEnd::Dropped => {}
        }
        stream = loop {
            if tx.is_closed() {
                return;
            }
            let delay = backoff.next_delay();
            debug!(%path, attempt = backoff.attempt(), ?delay, "reconnecting stream");
            tokio::time::sleep(delay).await;
            match client.stream(&path).await {
                Ok(stream) => {
                    info!(%path, "stream reconnected");
                    break stream;
                }
                Err(err) if err.is_retryable() => {
                    warn!(%path, error = %err, "stream reconnect failed");
                }
                Err(err) => {
                    error!(%path, error = %err, "stream reconnect rejected; giving up");
                    return;
                }
            }
        };
    }
}

async fn drain(
    path: &str,
    stream: &mut EventStream,
    tracker: &mut ChildTracker,
    tx: &mpsc::UnboundedSender<FeedEvent>,
    backoff: &mut Backoff,
) -> StreamEnd {
    while let Some(next) = stream.next_event().await {
        let event = match next {
            Ok(event) => event,
            Err(err) => {
                warn!(%path, error = %err, "stream read failed");
                return StreamEnd::Dropped;
            }
        };
        match event {
            StreamEvent::KeepAlive => continue,
            StreamEvent::Cancel(reason) => {
                error!(%path, %reason, "stream cancelled by server");
                return StreamEnd::Fatal;
            }
            StreamEvent::AuthRevoked => {
                error!(%path, "stream credentials revoked");
                return StreamEnd::Fatal;
            }
            event => {
                backoff.reset();
                for change in tracker.apply(event) {
                    if tx.send(change).is_err() {
                        return StreamEnd::Fatal;
                    }
                }
            }
        }
    }
    warn!(%path, "stream closed by server");
    StreamEnd::Dropped
}
