//! DB-compatible (e.g. de/serialisable) types.
//!
//! The types in this module are serialised in an DB-friendly way, e.g.:
//!
//! - IDs and datetimes are serialised in MongoDB's own format.
//! - Each type comes in a `New*` form without an ID, for insertion.

pub mod identity;
pub mod poll;
pub mod vote;

pub use identity::{Identity, NewIdentity};
pub use poll::{NewPoll, OptionId, Poll, PollOption};
pub use vote::{NewVote, Vote};
