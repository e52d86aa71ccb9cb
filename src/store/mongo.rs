use std::collections::HashMap;
use std::future::Future;

use log::debug;
use mongodb::{
    bson::{doc, from_document, to_bson, Document},
    error::{Error as DbError, TRANSIENT_TRANSACTION_ERROR},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Client, Database,
};
use rand::Rng;
use rocket::{futures::TryStreamExt, tokio::time};
use serde::Deserialize;

use crate::model::{
    channel::{Channel, ChannelValue},
    db::{Identity, NewIdentity, NewPoll, NewVote, OptionId, Poll, Vote},
    mongodb::{ensure_indexes_exist, is_duplicate_key_error, Coll, Id},
    otp::{Code, PendingCode},
};

use super::{Store, StoreError, StoreResult};

/// How many times to retry a transaction that lost a write conflict.
/// Every vote in a poll writes the poll document, so conflicts are routine
/// under load.
const MAX_TRANSACTION_ATTEMPTS: u64 = 20;

/// MongoDB-backed store. Uniqueness is enforced by the indexes from
/// [`ensure_indexes_exist`]; poll activation runs in a transaction, which
/// requires the server to be a replica set.
pub struct MongoStore {
    client: Client,
    identities: Coll<Identity>,
    polls: Coll<Poll>,
    votes: Coll<Vote>,
}

impl MongoStore {
    /// Connect to the given database, creating indexes as needed.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, DbError> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(db_name);
        ensure_indexes_exist(&db).await?;
        Ok(Self::new(client, &db))
    }

    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            identities: Coll::from_db(db),
            polls: Coll::from_db(db),
            votes: Coll::from_db(db),
        }
    }

    /// One attempt at the deactivate-all-then-insert transaction.
    async fn try_insert_active_poll(&self, poll: &Poll) -> Result<(), DbError> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        self.polls
            .update_many_with_session(
                doc! { "active": true },
                doc! { "$set": { "active": false } },
                None,
                &mut session,
            )
            .await?;
        self.polls
            .insert_one_with_session(poll, None, &mut session)
            .await?;
        session.commit_transaction().await
    }

    /// One attempt at inserting a vote while its poll is still active.
    /// Returns false, writing nothing, if the poll is not active.
    async fn try_insert_vote(&self, vote: &Vote) -> Result<bool, DbError> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        // Writing to the poll makes this conflict with a concurrent activation.
        let poll = self
            .polls
            .find_one_and_update_with_session(
                doc! { "_id": *vote.poll_id, "active": true },
                doc! { "$inc": { "votes_cast": 1 } },
                None,
                &mut session,
            )
            .await?;
        if poll.is_none() {
            session.abort_transaction().await?;
            return Ok(false);
        }
        self.votes
            .insert_one_with_session(vote, None, &mut session)
            .await?;
        session.commit_transaction().await?;
        Ok(true)
    }
}

/// Run a transaction, retrying it while it fails with a transient error.
async fn with_retries<T, F, Fut>(what: &str, mut attempt: F) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    let mut tries = 1;
    loop {
        match attempt().await {
            Err(e)
                if e.contains_label(TRANSIENT_TRANSACTION_ERROR)
                    && tries < MAX_TRANSACTION_ATTEMPTS =>
            {
                debug!("{what} attempt {tries} conflicted, retrying: {e}");
                let backoff = rand::thread_rng().gen_range(1..=5 * tries);
                time::sleep(std::time::Duration::from_millis(backoff)).await;
                tries += 1;
            }
            result => return result,
        }
    }
}

/// The field an identity stores a channel's value in.
fn value_field(channel: Channel) -> &'static str {
    match channel {
        Channel::Phone => "phone",
        Channel::Email => "email",
    }
}

/// The field an identity stores a channel's verified flag in.
fn verified_field(channel: Channel) -> &'static str {
    match channel {
        Channel::Phone => "phone_verified",
        Channel::Email => "email_verified",
    }
}

fn newest_first(field: &str) -> FindOptions {
    FindOptions::builder().sort(doc! { field: -1 }).build()
}

/// Map unique index violations to [`StoreError::Duplicate`].
fn duplicate_or(err: DbError) -> StoreError {
    if is_duplicate_key_error(&err) {
        StoreError::Duplicate
    } else {
        StoreError::Db(err)
    }
}

/// One row of the per-option vote count aggregation.
#[derive(Deserialize)]
struct OptionCount {
    #[serde(rename = "_id")]
    option: OptionId,
    count: u64,
}

#[rocket::async_trait]
impl Store for MongoStore {
    async fn insert_identity(&self, identity: NewIdentity) -> StoreResult<Id> {
        let identity = Identity {
            id: Id::new(),
            identity,
        };
        self.identities
            .insert_one(&identity, None)
            .await
            .map_err(duplicate_or)?;
        Ok(identity.id)
    }

    async fn identity(&self, id: Id) -> StoreResult<Option<Identity>> {
        Ok(self.identities.find_one(id.as_doc(), None).await?)
    }

    async fn identity_by_value(&self, value: &ChannelValue) -> StoreResult<Option<Identity>> {
        let filter = doc! { value_field(value.channel()): value.to_string() };
        Ok(self.identities.find_one(filter, None).await?)
    }

    async fn identities(&self) -> StoreResult<Vec<Identity>> {
        let identities = self
            .identities
            .find(None, newest_first("created_at"))
            .await?
            .try_collect()
            .await?;
        Ok(identities)
    }

    async fn identities_in(&self, ids: &[Id]) -> StoreResult<Vec<Identity>> {
        let ids = ids.iter().map(|id| **id).collect::<Vec<_>>();
        let identities = self
            .identities
            .find(doc! { "_id": { "$in": ids } }, None)
            .await?
            .try_collect()
            .await?;
        Ok(identities)
    }

    async fn set_pending_code(&self, id: Id, pending: &PendingCode) -> StoreResult<bool> {
        let update = doc! { "$set": { "pending": to_bson(pending)? } };
        let result = self.identities.update_one(id.as_doc(), update, None).await?;
        Ok(result.matched_count > 0)
    }

    async fn take_pending_code(&self, id: Id, code: &Code) -> StoreResult<Option<PendingCode>> {
        let filter = doc! {
            "_id": *id,
            "pending.code": code.to_string(),
        };
        let update = doc! { "$unset": { "pending": "" } };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::Before)
            .build();
        let before = self
            .identities
            .find_one_and_update(filter, update, options)
            .await?;
        Ok(before.and_then(|identity| identity.identity.pending))
    }

    async fn mark_verified(&self, id: Id, channel: Channel) -> StoreResult<bool> {
        let update = doc! {
            "$set": { verified_field(channel): true },
            "$unset": { "pending": "" },
        };
        let result = self.identities.update_one(id.as_doc(), update, None).await?;
        Ok(result.matched_count > 0)
    }

    async fn set_channel_value(&self, id: Id, value: &ChannelValue) -> StoreResult<bool> {
        let channel = value.channel();
        let channel_tag = to_bson(&channel)?;
        // A pipeline update, so the pending code is only dropped if it was
        // issued for the channel being replaced.
        let update = vec![doc! {
            "$set": {
                value_field(channel): { "$literal": value.to_string() },
                "pending": {
                    "$cond": [
                        { "$eq": ["$pending.channel", channel_tag] },
                        "$$REMOVE",
                        "$pending",
                    ]
                },
            }
        }];
        let result = self
            .identities
            .update_one(id.as_doc(), update, None)
            .await
            .map_err(duplicate_or)?;
        Ok(result.matched_count > 0)
    }

    async fn insert_active_poll(&self, poll: NewPoll) -> StoreResult<Id> {
        let poll = Poll {
            id: Id::new(),
            poll,
        };
        with_retries("Poll activation", || self.try_insert_active_poll(&poll))
            .await
            .map_err(duplicate_or)?;
        debug!("Activated poll {}", poll.id);
        Ok(poll.id)
    }

    async fn poll(&self, id: Id) -> StoreResult<Option<Poll>> {
        Ok(self.polls.find_one(id.as_doc(), None).await?)
    }

    async fn active_poll(&self) -> StoreResult<Option<Poll>> {
        Ok(self.polls.find_one(doc! { "active": true }, None).await?)
    }

    async fn polls(&self) -> StoreResult<Vec<Poll>> {
        let polls = self
            .polls
            .find(None, newest_first("created_at"))
            .await?
            .try_collect()
            .await?;
        Ok(polls)
    }

    async fn insert_vote(&self, vote: NewVote) -> StoreResult<Id> {
        let vote = Vote {
            id: Id::new(),
            vote,
        };
        let inserted = with_retries("Vote", || self.try_insert_vote(&vote))
            .await
            .map_err(duplicate_or)?;
        if inserted {
            Ok(vote.id)
        } else {
            Err(StoreError::PollInactive)
        }
    }

    async fn vote(&self, identity_id: Id, poll_id: Id) -> StoreResult<Option<Vote>> {
        let filter = doc! {
            "identity_id": *identity_id,
            "poll_id": *poll_id,
        };
        Ok(self.votes.find_one(filter, None).await?)
    }

    async fn votes(&self, poll_id: Id) -> StoreResult<Vec<Vote>> {
        let votes = self
            .votes
            .find(doc! { "poll_id": *poll_id }, newest_first("cast_at"))
            .await?
            .try_collect()
            .await?;
        Ok(votes)
    }

    async fn option_counts(&self, poll_id: Id) -> StoreResult<HashMap<OptionId, u64>> {
        let pipeline = [
            doc! { "$match": { "poll_id": *poll_id } },
            doc! { "$group": { "_id": "$option", "count": { "$sum": 1 } } },
        ];
        let rows: Vec<Document> = self
            .votes
            .aggregate(pipeline, None)
            .await?
            .try_collect()
            .await?;
        let mut counts = HashMap::new();
        for row in rows {
            let row: OptionCount = from_document(row)?;
            counts.insert(row.option, row.count);
        }
        Ok(counts)
    }
}
