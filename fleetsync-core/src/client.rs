use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::stream::{SseDecoder, StreamEvent};

#[derive(Debug, Error)]
pub enum FirebaseError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("malformed stream event: {0}")]
    MalformedEvent(String),
}

impl FirebaseError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FirebaseError::Api { status, .. } => Some(*status),
            FirebaseError::Request(err) => err.status(),
            _ => None,
        }
    }

    /// Auth and permission failures will not heal on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND)
        ) && !matches!(self, FirebaseError::Url(_))
    }
}

/// Thin client over the Realtime Database REST protocol: every node is
/// addressed as `{base}/{path}.json`.
#[derive(Clone)]
pub struct FirebaseClient {
    http: Client,
    base_url: Url,
    auth: Option<String>,
}

impl FirebaseClient {
    pub fn new(database_url: &str) -> Result<Self, FirebaseError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(database_url)?,
            auth: None,
        })
    }

    pub fn with_auth(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.auth = (!token.is_empty()).then_some(token);
        self
    }

    pub async fn get(&self, path: &str) -> Result<Value, FirebaseError> {
        let url = self.endpoint(path)?;
        let response = self.http.get(url).send().await?;
        Self::handle_response(response).await
    }

    pub async fn put<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
    ) -> Result<Value, FirebaseError> {
        let url = self.endpoint(path)?;
        let response = self.http.put(url).json(value).send().await?;
        Self::handle_response(response).await
    }

    pub async fn patch<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
    ) -> Result<Value, FirebaseError> {
        let url = self.endpoint(path)?;
        let response = self.http.patch(url).json(value).send().await?;
        Self::handle_response(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), FirebaseError> {
        let url = self.endpoint(path)?;
        let response = self.http.delete(url).send().await?;
        let _: Value = Self::handle_response(response).await?;
        Ok(())
    }

    /// Opens a server-sent-events subscription on `path`. The first event is
    /// always a `put` at `/` carrying the current subtree.
    pub async fn stream(&self, path: &str) -> Result<EventStream, FirebaseError> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FirebaseError::Api { status, body });
        }
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()));
        Ok(EventStream {
            chunks: Box::pin(chunks),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, FirebaseError> {
        let trimmed = path.trim_matches('/');
        let mut url = self.base_url.join(&format!("/{trimmed}.json"))?;
        if let Some(auth) = &self.auth {
            url.query_pairs_mut().append_pair("auth", auth);
        }
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, FirebaseError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(FirebaseError::Api { status, body })
        }
    }
}

type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

pub struct EventStream {
    chunks: ChunkStream,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
}

impl EventStream {
    /// Returns `None` once the server closes the connection.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent, FirebaseError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            match self.chunks.next().await? {
                Ok(chunk) => match self.decoder.feed(&chunk) {
                    Ok(events) => self.pending.extend(events),
                    Err(err) => return Some(Err(err)),
                },
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}
