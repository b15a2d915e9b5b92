mod client;
mod stream;

pub use client::{EventStream, FirebaseClient, FirebaseError};
pub use stream::{SseDecoder, StreamEvent};
