//! Proxy pool rotation with health scoring.
//!
//! Outbound identities are loaded from a JSON list at startup and selected
//! per fetch pass by health and speed. Every use feeds back a success or
//! failure report; handles that go bad are evicted permanently (restart the
//! process to reload the list).

mod handle;
mod pool;

// Re-export public API
pub use handle::{ProxyConfig, ProxyHandle};
pub use pool::{ProxyPool, ProxyStats};
