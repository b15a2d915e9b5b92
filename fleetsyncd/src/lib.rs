pub mod daemon;
pub mod http_api;
pub mod logging;
pub mod sync;
