pub mod backoff;
pub mod engine;
pub mod entities;
pub mod feed;
pub mod firebase_feed;
pub mod gate;
pub mod image;
mod locks;
pub mod memory_feed;
pub mod raw;
pub mod store;
mod tracker;
