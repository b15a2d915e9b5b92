use std::collections::BTreeMap;

use fleetsync_core::StreamEvent;
use serde_json::{Map, Value};

use super::feed::{FeedEvent, path_segments};

/// Turns path-level writes on a subscribed node into child-level events by
/// caching the last known value of every direct child.
#[derive(Debug, Default)]
pub struct ChildTracker {
    children: BTreeMap<String, Value>,
}

impl ChildTracker {
    pub fn apply(&mut self, event: StreamEvent) -> Vec<FeedEvent> {
        match event {
            StreamEvent::Put { path, data } => self.put(&path, data),
            StreamEvent::Patch { path, data } => self.patch(&path, data),
            StreamEvent::KeepAlive | StreamEvent::Cancel(_) | StreamEvent::AuthRevoked => {
                Vec::new()
            }
        }
    }

    pub fn put(&mut self, path: &str, data: Value) -> Vec<FeedEvent> {
        let segments = path_segments(path);
        let Some((key, rest)) = segments.split_first() else {
            return self.reset(data);
        };
        let previous = self.children.remove(key);
        let mut child = previous.clone().unwrap_or(Value::Null);
        set_at(&mut child, rest, data);
        let current = (!is_absent(&child)).then_some(child);
        self.settle(key, previous, current)
    }

    /// A patch is a put of each of its keys below `path`.
    pub fn patch(&mut self, path: &str, data: Value) -> Vec<FeedEvent> {
        let Value::Object(entries) = data else {
            return Vec::new();
        };
        let base = path.trim_end_matches('/');
        let mut events = Vec::new();
        for (key, value) in entries {
            events.extend(self.put(&format!("{base}/{key}"), value));
        }
        events
    }

    /// Replaces the whole snapshot and reports the difference. Used for the
    /// initial `put` and again after every reconnect.
    pub fn reset(&mut self, data: Value) -> Vec<FeedEvent> {
        let mut incoming = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut events = Vec::new();
        let known: Vec<String> = self.children.keys().cloned().collect();
        for key in known {
            let previous = self.children.remove(&key);
            let current = incoming.remove(&key).filter(|value| !is_absent(value));
            events.extend(self.settle(&key, previous, current));
        }
        for (key, value) in incoming {
            if !is_absent(&value) {
                events.extend(self.settle(&key, None, Some(value)));
            }
        }
        events
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn settle(
        &mut self,
        key: &str,
        previous: Option<Value>,
        current: Option<Value>,
    ) -> Vec<FeedEvent> {
        let key_owned = key.to_string();
        match (previous, current) {
            (None, None) => Vec::new(),
            (None, Some(value)) => {
                self.children.insert(key_owned.clone(), value.clone());
                vec![FeedEvent::ChildAdded {
                    key: key_owned,
                    value,
                }]
            }
            (Some(value), None) => vec![FeedEvent::ChildRemoved {
                key: key_owned,
                value,
            }],
            (Some(previous), Some(value)) => {
                self.children.insert(key_owned.clone(), value.clone());
                if previous == value {
                    Vec::new()
                } else {
                    vec![FeedEvent::ChildChanged {
                        key: key_owned,
                        value,
                    }]
                }
            }
        }
    }
}

/// Empty objects do not exist in the database; they read as null.
pub(crate) fn is_absent(value: &Value) -> bool {
    value.is_null() || value.as_object().is_some_and(Map::is_empty)
}

/// Writes `data` at `segments` below `target`, pruning branches left empty.
pub(crate) fn set_at<S: AsRef<str>>(target: &mut Value, segments: &[S], data: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *target = data;
        return;
    };
    if !target.is_object() {
        if is_absent(&data) {
            return;
        }
        *target = Value::Object(Map::new());
    }
    let Value::Object(map) = target else {
        return;
    };
    let mut child = map.remove(head.as_ref()).unwrap_or(Value::Null);
    set_at(&mut child, rest, data);
    if !is_absent(&child) {
        map.insert(head.as_ref().to_string(), child);
    }
}

pub(crate) fn get_at<'a, S: AsRef<str>>(target: &'a Value, segments: &[S]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(target, |node, segment| node.get(segment.as_ref()))
}
