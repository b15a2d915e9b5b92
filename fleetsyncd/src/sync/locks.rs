use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::entities::EntityKind;

const PRUNE_THRESHOLD: usize = 1024;

type ItemKey = (EntityKind, String);

/// Serializes work on one `(kind, id)` so the freshness check and the write
/// that follows it cannot interleave with another writer for the same row.
#[derive(Default)]
pub struct ItemLocks {
    slots: Mutex<HashMap<ItemKey, Weak<AsyncMutex<()>>>>,
}

impl ItemLocks {
    pub async fn lock(&self, kind: EntityKind, id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            if slots.len() >= PRUNE_THRESHOLD {
                slots.retain(|_, slot| slot.strong_count() > 0);
            }
            let key = (kind, id.to_string());
            match slots.get(&key).and_then(Weak::upgrade) {
                Some(slot) => slot,
                None => {
                    let slot = Arc::new(AsyncMutex::new(()));
                    slots.insert(key, Arc::downgrade(&slot));
                    slot
                }
            }
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.strong_count() > 0)
            .count()
    }
}
