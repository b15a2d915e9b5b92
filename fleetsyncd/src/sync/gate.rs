use tracing::debug;

use super::entities::{EntitySyncConfig, ItemContext, SYNCED, SyncRow, last_touched};
use super::raw::RawRecord;
use super::store::{RecordStore, StoreError};

/// Decides whether an incoming item should overwrite the mirrored row.
///
/// Only items flagged as synced are considered. A missing row always
/// accepts; otherwise the incoming touch time must be strictly newer.
pub async fn should_sync<R, S>(
    raw: &RawRecord,
    config: &EntitySyncConfig<R>,
    store: &S,
    ctx: &ItemContext,
) -> Result<bool, StoreError>
where
    R: SyncRow,
    S: RecordStore<R> + ?Sized,
{
    let flag = raw.text(&config.eligibility_field);
    if flag.as_deref() != Some(SYNCED) {
        debug!(
            kind = %config.kind,
            id = %ctx.id,
            field = %config.eligibility_field,
            flag = flag.as_deref().unwrap_or("<missing>"),
            "item not flagged as synced"
        );
        return Ok(false);
    }

    let Some(existing) = store.find_by_id(&ctx.id).await? else {
        return Ok(true);
    };

    let incoming = last_touched(raw, ctx);
    let fresher = incoming > existing.last_touched();
    if !fresher {
        debug!(
            kind = %config.kind,
            id = %ctx.id,
            incoming,
            existing = existing.last_touched(),
            "stored row is as new or newer"
        );
    }
    Ok(fresher)
}
