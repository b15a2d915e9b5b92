use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::{join_all, select_all};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::entities::{EntityKind, EntitySyncConfig, ItemContext, SyncConfigs, SyncRow};
use super::feed::{FeedError, FeedEvent, RemoteFeed};
use super::gate::should_sync;
use super::image::ImageUrlValidator;
use super::locks::ItemLocks;
use super::raw::{ID_FIELD, RawRecord, now_millis};
use super::store::{FleetStore, RecordStore};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to fetch {kind}: {source}")]
    Fetch { kind: EntityKind, source: FeedError },
    #[error("failed to subscribe to {kind}: {source}")]
    Subscribe { kind: EntityKind, source: FeedError },
    #[error("realtime sync already started")]
    AlreadyStarted,
}

impl EngineError {
    pub fn kind(&self) -> Option<EntityKind> {
        match self {
            EngineError::Fetch { kind, .. } | EngineError::Subscribe { kind, .. } => Some(*kind),
            EngineError::AlreadyStarted => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Written,
    /// Not eligible, or the stored row is as new or newer.
    Skipped,
    /// Failed structural validation.
    Rejected,
    /// The store could not be read or written.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub kind: EntityKind,
    pub fetched: usize,
    pub written: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl PassReport {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            fetched: 0,
            written: 0,
            skipped: 0,
            rejected: 0,
            failed: 0,
        }
    }

    fn record(&mut self, outcome: ItemOutcome) {
        self.fetched += 1;
        match outcome {
            ItemOutcome::Written => self.written += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Rejected => self.rejected += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }
}

/// Mirrors the remote feed into the relational store, one kind at a time
/// through full passes or continuously through live subscriptions.
pub struct SyncEngine<F, S> {
    feed: Arc<F>,
    store: Arc<S>,
    images: ImageUrlValidator,
    configs: SyncConfigs,
    locks: ItemLocks,
    realtime_started: AtomicBool,
}

impl<F, S> SyncEngine<F, S>
where
    F: RemoteFeed,
    S: FleetStore,
{
    pub fn new(feed: Arc<F>, store: Arc<S>) -> Self {
        Self {
            feed,
            store,
            images: ImageUrlValidator::default(),
            configs: SyncConfigs::default(),
            locks: ItemLocks::default(),
            realtime_started: AtomicBool::new(false),
        }
    }

    pub fn with_configs(mut self, configs: SyncConfigs) -> Self {
        self.configs = configs;
        self
    }

    pub fn with_image_validator(mut self, images: ImageUrlValidator) -> Self {
        self.images = images;
        self
    }

    pub fn configs(&self) -> &SyncConfigs {
        &self.configs
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Runs every kind's full pass concurrently. All passes run to completion;
    /// the first fetch failure, in kind order, is returned.
    pub async fn sync_all(&self) -> Result<Vec<PassReport>, EngineError> {
        let (tickets, expenses, mileage, trucks, users) = tokio::join!(
            self.sync_entity(&self.configs.tickets),
            self.sync_entity(&self.configs.expenses),
            self.sync_entity(&self.configs.mileage),
            self.sync_entity(&self.configs.trucks),
            self.sync_entity(&self.configs.users),
        );
        [tickets, expenses, mileage, trucks, users]
            .into_iter()
            .collect()
    }

    /// Fetches the kind's subtree once and reconciles every item in it.
    /// Rows absent remotely are left untouched.
    pub async fn sync_entity<R>(
        &self,
        config: &EntitySyncConfig<R>,
    ) -> Result<PassReport, EngineError>
    where
        R: SyncRow,
        S: RecordStore<R>,
    {
        let tree = self
            .feed
            .once(&config.path)
            .await
            .map_err(|source| EngineError::Fetch {
                kind: config.kind,
                source,
            })?;

        let leaves = bucket_leaves(config.kind, tree);
        let outcomes = join_all(
            leaves
                .into_iter()
                .map(|(key, item)| async move { self.reconcile_item(config, &key, item).await }),
        )
        .await;

        let mut report = PassReport::new(config.kind);
        for outcome in outcomes {
            report.record(outcome);
        }
        info!(
            kind = %report.kind,
            fetched = report.fetched,
            written = report.written,
            skipped = report.skipped,
            rejected = report.rejected,
            failed = report.failed,
            "full pass finished"
        );
        Ok(report)
    }

    /// Brings one remote item into the store if it is eligible and fresher
    /// than the mirrored row. Problems are logged and reported as an outcome.
    pub async fn reconcile_item<R>(
        &self,
        config: &EntitySyncConfig<R>,
        key: &str,
        item: Value,
    ) -> ItemOutcome
    where
        R: SyncRow,
        S: RecordStore<R>,
    {
        let kind = config.kind;
        let Some(mut raw) = RawRecord::from_value(item) else {
            error!(%kind, key, "item is not an object; skipping");
            return ItemOutcome::Rejected;
        };
        let ctx = ItemContext {
            id: resolve_id(kind, &raw, key),
            now_ms: now_millis(),
        };
        let id = ctx.id.as_str();
        let _guard = self.locks.lock(kind, id).await;

        match should_sync(&raw, config, self.store.as_ref(), &ctx).await {
            Ok(true) => {}
            Ok(false) => return ItemOutcome::Skipped,
            Err(err) => {
                error!(%kind, id, error = %err, "failed to read stored row");
                return ItemOutcome::Failed;
            }
        }

        if let Some(validate) = config.validate
            && let Err(err) = validate(&raw)
        {
            error!(%kind, id, error = %err, "invalid item; skipping");
            return ItemOutcome::Rejected;
        }

        if let Some(field) = config.image_field {
            let checked = self.images.validate(raw.text(field).as_deref()).await;
            raw.set_text(field, checked);
        }

        let row = (config.normalize)(&raw, &ctx);
        if let Some(validate_row) = config.validate_row
            && let Err(err) = validate_row(&row)
        {
            error!(%kind, id, error = %err, "invalid row after normalization; skipping");
            return ItemOutcome::Rejected;
        }

        match RecordStore::<R>::upsert(self.store.as_ref(), &row).await {
            Ok(()) => {
                debug!(%kind, id, "row written");
                ItemOutcome::Written
            }
            Err(err) => {
                error!(%kind, id, error = %err, "failed to write row");
                ItemOutcome::Failed
            }
        }
    }

    /// Deletes the mirrored row for a removed item. Removal bypasses the
    /// freshness gate. Returns whether a row existed.
    pub async fn remove_item<R>(&self, config: &EntitySyncConfig<R>, key: &str, item: Value) -> bool
    where
        R: SyncRow,
        S: RecordStore<R>,
    {
        let kind = config.kind;
        let raw = RawRecord::from_value(item).unwrap_or_default();
        let id = raw.text(ID_FIELD).unwrap_or_else(|| key.to_string());
        let _guard = self.locks.lock(kind, &id).await;

        match RecordStore::<R>::destroy(self.store.as_ref(), &id).await {
            Ok(true) => {
                info!(%kind, id = %id, "row removed after remote deletion");
                true
            }
            Ok(false) => {
                debug!(%kind, id = %id, "removed item was never mirrored");
                false
            }
            Err(err) => {
                error!(%kind, id = %id, error = %err, "failed to remove row");
                false
            }
        }
    }
}

include!("engine_realtime.rs");

/// Items for a full pass: the subtree is `bucket -> id -> item`.
fn bucket_leaves(kind: EntityKind, tree: Value) -> Vec<(String, Value)> {
    let Value::Object(buckets) = tree else {
        if !tree.is_null() {
            warn!(%kind, "subtree is not an object; nothing to sync");
        }
        return Vec::new();
    };

    buckets
        .into_iter()
        .flat_map(|(bucket, items)| bucket_items(kind, &bucket, items))
        .collect()
}

/// Items of one bucket, `id -> item`. A live event carries a single bucket
/// and is split here as well.
fn bucket_items(kind: EntityKind, bucket: &str, items: Value) -> Vec<(String, Value)> {
    match items {
        Value::Object(items) => items.into_iter().collect(),
        Value::Null => Vec::new(),
        _ => {
            warn!(%kind, bucket = %bucket, "bucket is not an object; skipping");
            Vec::new()
        }
    }
}

fn resolve_id(kind: EntityKind, raw: &RawRecord, key: &str) -> String {
    if let Some(id) = raw.text(ID_FIELD) {
        return id;
    }
    let key = key.trim();
    if !key.is_empty() {
        return key.to_string();
    }
    let id = uuid::Uuid::new_v4().to_string();
    warn!(%kind, id = %id, "item has no id; generated one");
    id
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
