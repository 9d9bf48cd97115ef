//! Blocking worker pool with context-aware call routing
//!
//! # Features
//! - Self-sizing thread pool: grows under backlog, shrinks to zero when idle
//! - Per-thread context tags (event-loop thread / pool worker)
//! - Routing wrappers that run inline when already on the right thread
//! - Dedicated event loop thread on a tokio current-thread runtime
//! - Job panic isolation and pluggable error reporting

pub mod context;
pub mod dispatch;
pub mod errors;
pub mod event_loop;
pub mod handle;
pub mod model;
pub mod pool;

pub use context::ContextRegistry;
pub use dispatch::{assert_in_pool, assert_in_pool_with, run_in_pool, run_on_loop, Routed};
pub use event_loop::{EventLoop, LoopHandle, LoopThread};
pub use model::ContextTag;
pub use pool::{Config, ThreadPool, ThreadPoolInner};
