//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings.
//! - Datetimes are serialised as RFC 3339 timestamps.
//! - Request bodies hold raw user input, validated into core types by
//!   their methods before anything reaches the engine.

pub mod auth;
pub mod id;
pub mod identity;
pub mod poll;

pub use id::ApiId;
