//! Session storage backends.
//!
//! Each backend implements [`Provider`] (defined in [`traits`]) and is made
//! available to the engine by registering it under a name in a
//! [`ProviderRegistry`]. The crate ships two: [`MemoryProvider`] for single
//! process deployments and tests, and [`SqliteProvider`] for sessions that
//! must survive a restart.
//!
//! # Extension
//!
//! To add a backend, implement [`Provider`] plus a matching
//! [`ProviderConfig`] in a new submodule, then register an instance at
//! startup. Stores handed out by the backend write back through a
//! [`StoreWriter`] that the backend owns.

pub mod memory;
pub mod registry;
pub mod serializer;
pub mod sqlite;
pub mod traits;

pub use memory::{MemoryProvider, MemoryProviderConfig};
pub use registry::ProviderRegistry;
pub use serializer::{Base64JsonSerializer, JsonSerializer};
pub use sqlite::{SqliteProvider, SqliteProviderConfig};
pub use traits::{downcast_config, Provider, ProviderConfig, SessionSerializer, StoreWriter};
