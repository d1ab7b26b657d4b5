//! Session engine: stores, per-request cache, lifecycle and expiry sweep.

pub mod cache;
pub mod manager;
pub mod store;
pub mod sweep;

pub use cache::RequestCache;
pub use manager::SessionManager;
pub use store::{SessionStore, SessionValues};
pub use sweep::SweepTask;
