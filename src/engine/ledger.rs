use std::collections::HashMap;

use chrono::Utc;
use log::{info, warn};

use crate::error::{Error, Result};
use crate::model::{
    db::{Identity, NewVote, OptionId, Vote},
    mongodb::Id,
};
use crate::store::{SharedStore, StoreError};

use super::{identity::IdentityStore, poll::PollRegistry};

/// Vote counts for one option of a poll.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionTally {
    pub id: OptionId,
    pub text: String,
    pub votes: u64,
    /// Share of the total, rounded to one decimal place.
    pub percentage: f64,
}

/// Aggregated results of a poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Tally {
    pub poll_id: Id,
    pub question: String,
    pub active: bool,
    pub total: u64,
    /// In option order, including options nobody chose.
    pub options: Vec<OptionTally>,
}

/// One vote alongside the identity that cast it.
#[derive(Debug, Clone)]
pub struct Ballot {
    pub vote: Vote,
    pub identity: Identity,
}

/// Records votes, at most one per identity per poll, and aggregates them.
#[derive(Clone)]
pub struct VoteLedger {
    store: SharedStore,
    identities: IdentityStore,
    polls: PollRegistry,
}

impl VoteLedger {
    pub fn new(store: SharedStore, identities: IdentityStore, polls: PollRegistry) -> Self {
        Self {
            store,
            identities,
            polls,
        }
    }

    /// Cast a vote in the active poll.
    ///
    /// The one-vote rule is enforced by the store, so of any number of
    /// concurrent attempts by one identity exactly one succeeds and the rest
    /// fail with [`Error::AlreadyVoted`]. The store also re-checks that the
    /// poll is active as it inserts, so a vote racing a new poll's activation
    /// fails with [`Error::PollNotActive`] rather than landing in the old poll.
    pub async fn cast_vote(&self, identity_id: Id, poll_id: Id, option: OptionId) -> Result<Id> {
        let identity = self.identities.identity(identity_id).await?;
        if !identity.is_verified() {
            return Err(Error::NotVerified);
        }

        let poll = self
            .polls
            .get_active()
            .await?
            .filter(|active| active.id == poll_id)
            .ok_or(Error::PollNotActive(poll_id))?;
        if poll.option(option).is_none() {
            return Err(Error::InvalidOption {
                poll: poll_id,
                option,
            });
        }

        let vote = NewVote {
            identity_id,
            poll_id,
            option,
            cast_at: Utc::now(),
        };
        match self.store.insert_vote(vote).await {
            Ok(id) => {
                info!("Identity {identity_id} voted in poll {poll_id}");
                Ok(id)
            }
            Err(StoreError::Duplicate) => Err(Error::AlreadyVoted(poll_id)),
            Err(StoreError::PollInactive) => Err(Error::PollNotActive(poll_id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn has_voted(&self, identity_id: Id, poll_id: Id) -> Result<bool> {
        Ok(self.vote_of(identity_id, poll_id).await?.is_some())
    }

    pub async fn vote_of(&self, identity_id: Id, poll_id: Id) -> Result<Option<Vote>> {
        Ok(self.store.vote(identity_id, poll_id).await?)
    }

    /// Count the votes in a poll, active or not.
    pub async fn tally(&self, poll_id: Id) -> Result<Tally> {
        let poll = self.polls.poll(poll_id).await?;
        let counts = self.store.option_counts(poll_id).await?;
        let total = counts.values().sum();

        let options = poll
            .options
            .iter()
            .map(|option| {
                let votes = counts.get(&option.id).copied().unwrap_or(0);
                OptionTally {
                    id: option.id,
                    text: option.text.clone(),
                    votes,
                    percentage: percentage(votes, total),
                }
            })
            .collect();

        Ok(Tally {
            poll_id,
            question: poll.poll.question,
            active: poll.poll.active,
            total,
            options,
        })
    }

    /// Every vote in a poll with who cast it, newest first.
    pub async fn ballots(&self, poll_id: Id) -> Result<Vec<Ballot>> {
        self.polls.poll(poll_id).await?;
        let votes = self.store.votes(poll_id).await?;
        let voter_ids = votes.iter().map(|vote| vote.identity_id).collect::<Vec<_>>();
        let identities = self
            .store
            .identities_in(&voter_ids)
            .await?
            .into_iter()
            .map(|identity| (identity.id, identity))
            .collect::<HashMap<_, _>>();

        let ballots = votes
            .into_iter()
            .filter_map(|vote| match identities.get(&vote.identity_id) {
                Some(identity) => Some(Ballot {
                    identity: identity.clone(),
                    vote,
                }),
                None => {
                    warn!("Vote {} refers to missing identity {}", vote.id, vote.identity_id);
                    None
                }
            })
            .collect();
        Ok(ballots)
    }
}

/// `votes` as a percentage of `total`, to one decimal place.
fn percentage(votes: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (votes as f64 * 1000.0 / total as f64).round() / 10.0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rocket::tokio::sync::Notify;

    use crate::model::{
        channel::{Channel, ChannelValue, Phone},
        db::{NewIdentity, NewPoll, Poll},
        otp::{Code, PendingCode},
    };
    use crate::store::{MemoryStore, Store, StoreResult};

    use super::*;

    struct Fixture {
        identities: IdentityStore,
        polls: PollRegistry,
        ledger: VoteLedger,
    }

    fn fixture() -> Fixture {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let identities = IdentityStore::new(store.clone());
        let polls = PollRegistry::new(store.clone());
        let ledger = VoteLedger::new(store, identities.clone(), polls.clone());
        Fixture {
            identities,
            polls,
            ledger,
        }
    }

    impl Fixture {
        async fn verified(&self, value: ChannelValue) -> Id {
            let id = self.identities.register(value.clone(), "Voter").await.unwrap();
            self.identities
                .mark_verified(id, value.channel())
                .await
                .unwrap();
            id
        }

        async fn voters(&self, n: u64) -> Vec<Id> {
            let mut ids = vec![];
            for i in 0..n {
                let phone: Phone = format!("+4412345{i:05}").parse().unwrap();
                ids.push(self.verified(ChannelValue::Phone(phone)).await);
            }
            ids
        }

        async fn poll(&self) -> Id {
            self.polls
                .create_poll("Which team should win?", &["Team A", "Team B", "Team C"])
                .await
                .unwrap()
        }
    }

    #[rocket::async_test]
    async fn vote_then_tally() {
        let f = fixture();
        let voter = f.verified(ChannelValue::example_phone()).await;
        let p1 = f.poll().await;

        f.ledger.cast_vote(voter, p1, 1).await.unwrap();
        assert!(f.ledger.has_voted(voter, p1).await.unwrap());
        assert_eq!(f.ledger.vote_of(voter, p1).await.unwrap().unwrap().option, 1);

        let tally = f.ledger.tally(p1).await.unwrap();
        assert_eq!(tally.total, 1);
        assert_eq!(tally.options[0].votes, 1);
        assert_eq!(tally.options[0].percentage, 100.0);
        assert_eq!(tally.options[1].votes, 0);

        let err = f.ledger.cast_vote(voter, p1, 2).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyVoted(id) if id == p1));
        assert_eq!(f.ledger.tally(p1).await.unwrap().total, 1);
    }

    #[rocket::async_test]
    async fn superseded_poll_rejects_votes() {
        let f = fixture();
        let voter = f.verified(ChannelValue::example_phone()).await;
        let p1 = f.poll().await;
        let p2 = f.poll().await;

        let err = f.ledger.cast_vote(voter, p1, 1).await.unwrap_err();
        assert!(matches!(err, Error::PollNotActive(id) if id == p1));
        let err = f.ledger.cast_vote(voter, Id::new(), 1).await.unwrap_err();
        assert!(matches!(err, Error::PollNotActive(_)));

        f.ledger.cast_vote(voter, p2, 3).await.unwrap();
        assert!(!f.ledger.tally(p1).await.unwrap().active);
    }

    /// A memory store whose vote inserts wait for a signal, to let a test
    /// interleave other operations between the ledger's checks and the insert.
    #[derive(Default)]
    struct HeldVotes {
        inner: MemoryStore,
        reached: Notify,
        release: Notify,
    }

    #[rocket::async_trait]
    impl Store for HeldVotes {
        async fn insert_identity(&self, identity: NewIdentity) -> StoreResult<Id> {
            self.inner.insert_identity(identity).await
        }

        async fn identity(&self, id: Id) -> StoreResult<Option<Identity>> {
            self.inner.identity(id).await
        }

        async fn identity_by_value(&self, value: &ChannelValue) -> StoreResult<Option<Identity>> {
            self.inner.identity_by_value(value).await
        }

        async fn identities(&self) -> StoreResult<Vec<Identity>> {
            self.inner.identities().await
        }

        async fn identities_in(&self, ids: &[Id]) -> StoreResult<Vec<Identity>> {
            self.inner.identities_in(ids).await
        }

        async fn set_pending_code(&self, id: Id, pending: &PendingCode) -> StoreResult<bool> {
            self.inner.set_pending_code(id, pending).await
        }

        async fn take_pending_code(&self, id: Id, code: &Code) -> StoreResult<Option<PendingCode>> {
            self.inner.take_pending_code(id, code).await
        }

        async fn mark_verified(&self, id: Id, channel: Channel) -> StoreResult<bool> {
            self.inner.mark_verified(id, channel).await
        }

        async fn set_channel_value(&self, id: Id, value: &ChannelValue) -> StoreResult<bool> {
            self.inner.set_channel_value(id, value).await
        }

        async fn insert_active_poll(&self, poll: NewPoll) -> StoreResult<Id> {
            self.inner.insert_active_poll(poll).await
        }

        async fn poll(&self, id: Id) -> StoreResult<Option<Poll>> {
            self.inner.poll(id).await
        }

        async fn active_poll(&self) -> StoreResult<Option<Poll>> {
            self.inner.active_poll().await
        }

        async fn polls(&self) -> StoreResult<Vec<Poll>> {
            self.inner.polls().await
        }

        async fn insert_vote(&self, vote: NewVote) -> StoreResult<Id> {
            self.reached.notify_one();
            self.release.notified().await;
            self.inner.insert_vote(vote).await
        }

        async fn vote(&self, identity_id: Id, poll_id: Id) -> StoreResult<Option<Vote>> {
            self.inner.vote(identity_id, poll_id).await
        }

        async fn votes(&self, poll_id: Id) -> StoreResult<Vec<Vote>> {
            self.inner.votes(poll_id).await
        }

        async fn option_counts(&self, poll_id: Id) -> StoreResult<HashMap<OptionId, u64>> {
            self.inner.option_counts(poll_id).await
        }
    }

    #[rocket::async_test]
    async fn vote_racing_activation_is_rejected() {
        let held = Arc::new(HeldVotes::default());
        let store: SharedStore = held.clone();
        let identities = IdentityStore::new(store.clone());
        let polls = PollRegistry::new(store.clone());
        let ledger = VoteLedger::new(store, identities.clone(), polls.clone());

        let voter = identities
            .register(ChannelValue::example_phone(), "Ada")
            .await
            .unwrap();
        identities.mark_verified(voter, Channel::Phone).await.unwrap();
        let p1 = polls.create_poll("Q1", &["Yes", "No"]).await.unwrap();

        let cast = {
            let ledger = ledger.clone();
            rocket::tokio::spawn(async move { ledger.cast_vote(voter, p1, 1).await })
        };
        // The vote has passed every check; a new poll now takes over.
        held.reached.notified().await;
        let p2 = polls.create_poll("Q2", &["Yes", "No"]).await.unwrap();
        held.release.notify_one();

        let err = cast.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::PollNotActive(id) if id == p1));
        let tally = ledger.tally(p1).await.unwrap();
        assert!(!tally.active);
        assert_eq!(tally.total, 0);
        assert!(!ledger.has_voted(voter, p1).await.unwrap());
        assert_eq!(polls.get_active().await.unwrap().unwrap().id, p2);
    }

    #[rocket::async_test]
    async fn unverified_and_invalid_option() {
        let f = fixture();
        let p1 = f.poll().await;
        let unverified = f
            .identities
            .register(ChannelValue::example_email(), "Grace")
            .await
            .unwrap();
        let err = f.ledger.cast_vote(unverified, p1, 1).await.unwrap_err();
        assert!(matches!(err, Error::NotVerified));

        let voter = f.verified(ChannelValue::example_phone()).await;
        for option in [0, 4] {
            let err = f.ledger.cast_vote(voter, p1, option).await.unwrap_err();
            assert!(matches!(err, Error::InvalidOption { .. }));
        }
        assert!(!f.ledger.has_voted(voter, p1).await.unwrap());
    }

    #[rocket::async_test]
    async fn concurrent_votes_accept_exactly_one() {
        const N: usize = 16;
        let f = fixture();
        let voter = f.verified(ChannelValue::example_phone()).await;
        let p1 = f.poll().await;

        let handles = (0..N)
            .map(|i| {
                let ledger = f.ledger.clone();
                let option = (i % 3) as OptionId + 1;
                rocket::tokio::spawn(async move { ledger.cast_vote(voter, p1, option).await })
            })
            .collect::<Vec<_>>();

        let mut accepted = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(Error::AlreadyVoted(_)) => rejected += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(rejected, N - 1);
        assert_eq!(f.ledger.tally(p1).await.unwrap().total, 1);
    }

    #[rocket::async_test]
    async fn percentages_sum_to_one_hundred() {
        let f = fixture();
        let p1 = f.poll().await;

        let empty = f.ledger.tally(p1).await.unwrap();
        assert_eq!(empty.total, 0);
        assert!(empty.options.iter().all(|o| o.percentage == 0.0));

        let voters = f.voters(7).await;
        for (i, voter) in voters.iter().enumerate() {
            let option = if i < 4 { 1 } else if i < 6 { 2 } else { 3 };
            f.ledger.cast_vote(*voter, p1, option).await.unwrap();
        }

        let tally = f.ledger.tally(p1).await.unwrap();
        assert_eq!(tally.total, 7);
        let percentages = tally.options.iter().map(|o| o.percentage).collect::<Vec<_>>();
        assert_eq!(percentages, [57.1, 28.6, 14.3]);
        let sum: f64 = percentages.iter().sum();
        assert!((sum - 100.0).abs() <= 0.1, "{sum}");
    }

    #[rocket::async_test]
    async fn ballots_name_their_voters() {
        let f = fixture();
        let p1 = f.poll().await;
        let voters = f.voters(2).await;
        f.ledger.cast_vote(voters[0], p1, 2).await.unwrap();
        f.ledger.cast_vote(voters[1], p1, 3).await.unwrap();

        let ballots = f.ledger.ballots(p1).await.unwrap();
        assert_eq!(ballots.len(), 2);
        assert_eq!(ballots[0].identity.id, voters[1]);
        assert_eq!(ballots[0].vote.option, 3);
        assert!(ballots[1].identity.is_verified_on(Channel::Phone));

        let err = f.ledger.ballots(Id::new()).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn rounding() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(1, 3), 33.3);
        assert_eq!(percentage(2, 3), 66.7);
        assert_eq!(percentage(3, 3), 100.0);
    }
}
