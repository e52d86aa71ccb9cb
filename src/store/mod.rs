//! Storage backends.
//!
//! Every uniqueness invariant is enforced here, by the backend, rather than by
//! read-then-write logic in the engine: a duplicate insert fails with
//! [`StoreError::Duplicate`] and the engine maps that to a domain error.

use std::collections::HashMap;
use std::sync::Arc;

use mongodb::{
    bson::{de::Error as BsonDeError, ser::Error as BsonSerError},
    error::Error as DbError,
};
use thiserror::Error;

use crate::model::{
    channel::{Channel, ChannelValue},
    db::{Identity, NewIdentity, NewPoll, NewVote, OptionId, Poll, Vote},
    mongodb::Id,
    otp::{Code, PendingCode},
};

pub use self::memory::MemoryStore;
pub use self::mongo::MongoStore;

mod memory;
mod mongo;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A shared handle on whichever backend is configured.
pub type SharedStore = Arc<dyn Store>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("unique constraint violated")]
    Duplicate,
    /// A vote was cast in a poll that is not (or is no longer) active.
    #[error("poll is not active")]
    PollInactive,
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    BsonSer(#[from] BsonSerError),
    #[error(transparent)]
    BsonDe(#[from] BsonDeError),
}

/// Persistent state for identities, polls and votes.
///
/// Each method is atomic on its own; none of them hold anything across calls.
#[rocket::async_trait]
pub trait Store: Send + Sync {
    /// Insert a new identity. Fails with [`StoreError::Duplicate`] if its
    /// phone or email already belongs to another identity.
    async fn insert_identity(&self, identity: NewIdentity) -> StoreResult<Id>;

    async fn identity(&self, id: Id) -> StoreResult<Option<Identity>>;

    async fn identity_by_value(&self, value: &ChannelValue) -> StoreResult<Option<Identity>>;

    /// All identities, newest first.
    async fn identities(&self) -> StoreResult<Vec<Identity>>;

    /// The identities with the given IDs, in no particular order. Unknown IDs
    /// are skipped.
    async fn identities_in(&self, ids: &[Id]) -> StoreResult<Vec<Identity>>;

    /// Replace the identity's pending code. Returns false if there is no such identity.
    async fn set_pending_code(&self, id: Id, pending: &PendingCode) -> StoreResult<bool>;

    /// Atomically clear the pending code if and only if it equals `code`,
    /// returning what was cleared. At most one caller can ever take a given code.
    async fn take_pending_code(&self, id: Id, code: &Code) -> StoreResult<Option<PendingCode>>;

    /// Set the channel's verified flag and clear any pending code.
    /// Returns false if there is no such identity.
    async fn mark_verified(&self, id: Id, channel: Channel) -> StoreResult<bool>;

    /// Record a value on a channel of an existing identity. Fails with
    /// [`StoreError::Duplicate`] if another identity already holds the value.
    /// A pending code issued for that channel is cleared along with the old value.
    async fn set_channel_value(&self, id: Id, value: &ChannelValue) -> StoreResult<bool>;

    /// Insert a poll as the only active poll, deactivating every other poll
    /// in the same atomic step.
    async fn insert_active_poll(&self, poll: NewPoll) -> StoreResult<Id>;

    async fn poll(&self, id: Id) -> StoreResult<Option<Poll>>;

    async fn active_poll(&self) -> StoreResult<Option<Poll>>;

    /// All polls, newest first.
    async fn polls(&self) -> StoreResult<Vec<Poll>>;

    /// Insert a vote, in the same atomic step as checking that its poll is
    /// still the active one. Fails with [`StoreError::PollInactive`] if it is
    /// not, and with [`StoreError::Duplicate`] if the identity already has a
    /// vote for the poll.
    async fn insert_vote(&self, vote: NewVote) -> StoreResult<Id>;

    async fn vote(&self, identity_id: Id, poll_id: Id) -> StoreResult<Option<Vote>>;

    /// Every vote in a poll, newest first.
    async fn votes(&self, poll_id: Id) -> StoreResult<Vec<Vote>>;

    /// Number of votes per option. Options with no votes may be absent.
    async fn option_counts(&self, poll_id: Id) -> StoreResult<HashMap<OptionId, u64>>;
}
