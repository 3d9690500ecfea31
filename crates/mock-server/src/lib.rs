//! Serving layer for the mock server: hot-swap HTTP server, dispatch table,
//! logging middleware, SSE fan-out, file watching and static modes.

pub mod middleware;
pub mod router;
pub mod server;
pub mod sse;
pub mod static_files;
pub mod watcher;

pub use server::{normalize_log_path, MockServer, ResponseBody};
pub use sse::EventBroadcaster;
