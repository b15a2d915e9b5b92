use serde::Deserialize;
use serde_json::Value;

use crate::client::FirebaseError;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Put { path: String, data: Value },
    Patch { path: String, data: Value },
    KeepAlive,
    Cancel(String),
    AuthRevoked,
}

#[derive(Debug, Deserialize)]
struct PathPayload {
    path: String,
    #[serde(default)]
    data: Value,
}

/// Incremental decoder for the `text/event-stream` framing used by the
/// streaming REST endpoint. Bytes may arrive split at arbitrary offsets.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, FirebaseError> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if let Some(event) = self.dispatch()? {
                    out.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        Ok(out)
    }

    fn dispatch(&mut self) -> Result<Option<StreamEvent>, FirebaseError> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data).join("\n");
        let Some(event) = event else {
            return Ok(None);
        };
        let parsed = match event.as_str() {
            "put" => {
                let payload = parse_payload(&data)?;
                Some(StreamEvent::Put {
                    path: payload.path,
                    data: payload.data,
                })
            }
            "patch" => {
                let payload = parse_payload(&data)?;
                Some(StreamEvent::Patch {
                    path: payload.path,
                    data: payload.data,
                })
            }
            "keep-alive" => Some(StreamEvent::KeepAlive),
            "cancel" => Some(StreamEvent::Cancel(data)),
            "auth_revoked" => Some(StreamEvent::AuthRevoked),
            _ => None,
        };
        Ok(parsed)
    }
}

fn parse_payload(data: &str) -> Result<PathPayload, FirebaseError> {
    serde_json::from_str(data).map_err(|err| FirebaseError::MalformedEvent(format!("{err}: {data}")))
}
