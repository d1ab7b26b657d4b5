#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::assigning_clones,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::implicit_clone,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::needless_pass_by_value,
    clippy::redundant_closure_for_method_calls,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unused_self,
    clippy::unnecessary_wraps
)]

//! Request sessions for stateless HTTP servers.
//!
//! A [`SessionManager`] resolves the client's session token from the request
//! (cookie, query parameter or header), loads the matching [`SessionStore`]
//! from a registered backend, re-issues the token on the response and runs a
//! background sweep that deletes expired sessions.

pub mod config;
pub mod error;
pub mod identity;
pub mod providers;
pub mod sessions;
pub mod transport;

pub use config::SessionConfig;
pub use error::SessionError;
pub use identity::RequestId;
pub use providers::{Provider, ProviderRegistry};
pub use sessions::{SessionManager, SessionStore, SessionValues};
pub use transport::{Exchange, HttpExchange};

/// Crate version, reported by the admin CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
