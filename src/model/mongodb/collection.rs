use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::db::{Identity, Poll, Vote};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Documents are always inserted with a client-generated ID, so there are no
// separate `New*` collection types.

// Identity collection
const IDENTITIES: &str = "identities";
impl MongoCollection for Identity {
    const NAME: &'static str = IDENTITIES;
}

// Poll collection
const POLLS: &str = "polls";
impl MongoCollection for Poll {
    const NAME: &'static str = POLLS;
}

// Vote collection
const VOTES: &str = "votes";
impl MongoCollection for Vote {
    const NAME: &'static str = VOTES;
}

/// Ensure that all the required indexes exist on the given database.
/// These indexes are what enforce the uniqueness invariants under concurrency.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();
    // Identities registered on only one channel have no value for the other.
    let unique_sparse = IndexOptions::builder().unique(true).sparse(true).build();

    // Identity collection: one identity per phone number and per email.
    let phone_index = IndexModel::builder()
        .keys(doc! {"phone": 1})
        .options(unique_sparse.clone())
        .build();
    let email_index = IndexModel::builder()
        .keys(doc! {"email": 1})
        .options(unique_sparse)
        .build();
    Coll::<Identity>::from_db(db)
        .create_indexes([phone_index, email_index], None)
        .await?;

    // Poll collection: at most one active poll.
    let active_index = IndexModel::builder()
        .keys(doc! {"active": 1})
        .options(
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(doc! {"active": true})
                .build(),
        )
        .build();
    Coll::<Poll>::from_db(db)
        .create_index(active_index, None)
        .await?;

    // Vote collection: one vote per identity per poll.
    let vote_index = IndexModel::builder()
        .keys(doc! {"identity_id": 1, "poll_id": 1})
        .options(unique)
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(vote_index, None)
        .await?;

    Ok(())
}
