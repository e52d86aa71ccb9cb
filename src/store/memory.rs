use std::collections::{HashMap, HashSet};

use rocket::tokio::sync::Mutex;

use crate::model::{
    channel::{Channel, ChannelValue},
    db::{Identity, NewIdentity, NewPoll, NewVote, OptionId, Poll, Vote},
    mongodb::Id,
    otp::{Code, PendingCode},
};

use super::{Store, StoreError, StoreResult};

/// An in-process store. One mutex guards all state, so every operation is
/// serialised and trivially atomic. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Default)]
struct State {
    identities: Vec<Identity>,
    /// Unique keys: the display form of every phone and email in use.
    values: HashMap<(Channel, String), Id>,
    polls: Vec<Poll>,
    votes: Vec<Vote>,
    /// Unique key: (identity, poll).
    voted: HashSet<(Id, Id)>,
}

impl State {
    fn identity_mut(&mut self, id: Id) -> Option<&mut Identity> {
        self.identities.iter_mut().find(|identity| identity.id == id)
    }
}

fn value_key(value: &ChannelValue) -> (Channel, String) {
    (value.channel(), value.to_string())
}

#[rocket::async_trait]
impl Store for MemoryStore {
    async fn insert_identity(&self, identity: NewIdentity) -> StoreResult<Id> {
        let mut state = self.state.lock().await;
        let keys = [Channel::Phone, Channel::Email]
            .into_iter()
            .filter_map(|channel| identity.value(channel))
            .map(|value| value_key(&value))
            .collect::<Vec<_>>();
        if keys.iter().any(|key| state.values.contains_key(key)) {
            return Err(StoreError::Duplicate);
        }

        let id = Id::new();
        for key in keys {
            state.values.insert(key, id);
        }
        state.identities.push(Identity { id, identity });
        Ok(id)
    }

    async fn identity(&self, id: Id) -> StoreResult<Option<Identity>> {
        let state = self.state.lock().await;
        Ok(state.identities.iter().find(|i| i.id == id).cloned())
    }

    async fn identity_by_value(&self, value: &ChannelValue) -> StoreResult<Option<Identity>> {
        let state = self.state.lock().await;
        let identity = state
            .values
            .get(&value_key(value))
            .and_then(|id| state.identities.iter().find(|i| i.id == *id))
            .cloned();
        Ok(identity)
    }

    async fn identities(&self) -> StoreResult<Vec<Identity>> {
        let state = self.state.lock().await;
        Ok(state.identities.iter().rev().cloned().collect())
    }

    async fn identities_in(&self, ids: &[Id]) -> StoreResult<Vec<Identity>> {
        let state = self.state.lock().await;
        let identities = state
            .identities
            .iter()
            .filter(|identity| ids.contains(&identity.id))
            .cloned()
            .collect();
        Ok(identities)
    }

    async fn set_pending_code(&self, id: Id, pending: &PendingCode) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.identity_mut(id) {
            Some(identity) => {
                identity.pending = Some(pending.clone());
                true
            }
            None => false,
        })
    }

    async fn take_pending_code(&self, id: Id, code: &Code) -> StoreResult<Option<PendingCode>> {
        let mut state = self.state.lock().await;
        let identity = match state.identity_mut(id) {
            Some(identity) => identity,
            None => return Ok(None),
        };
        let matches = identity
            .pending
            .as_ref()
            .map_or(false, |pending| pending.code == *code);
        Ok(if matches { identity.pending.take() } else { None })
    }

    async fn mark_verified(&self, id: Id, channel: Channel) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.identity_mut(id) {
            Some(identity) => {
                identity.mark_verified(channel);
                true
            }
            None => false,
        })
    }

    async fn set_channel_value(&self, id: Id, value: &ChannelValue) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let key = value_key(value);
        match state.values.get(&key) {
            Some(owner) if *owner != id => return Err(StoreError::Duplicate),
            _ => {}
        }

        let identity = match state.identity_mut(id) {
            Some(identity) => identity,
            None => return Ok(false),
        };
        let previous = identity.value(value.channel());
        identity.set_value(value.clone());
        if identity
            .pending
            .as_ref()
            .map_or(false, |pending| pending.channel == value.channel())
        {
            identity.pending = None;
        }

        if let Some(previous) = previous {
            state.values.remove(&value_key(&previous));
        }
        state.values.insert(key, id);
        Ok(true)
    }

    async fn insert_active_poll(&self, poll: NewPoll) -> StoreResult<Id> {
        let mut state = self.state.lock().await;
        for existing in state.polls.iter_mut() {
            existing.active = false;
        }
        let id = Id::new();
        state.polls.push(Poll { id, poll });
        Ok(id)
    }

    async fn poll(&self, id: Id) -> StoreResult<Option<Poll>> {
        let state = self.state.lock().await;
        Ok(state.polls.iter().find(|p| p.id == id).cloned())
    }

    async fn active_poll(&self) -> StoreResult<Option<Poll>> {
        let state = self.state.lock().await;
        Ok(state.polls.iter().find(|p| p.active).cloned())
    }

    async fn polls(&self) -> StoreResult<Vec<Poll>> {
        let state = self.state.lock().await;
        Ok(state.polls.iter().rev().cloned().collect())
    }

    async fn insert_vote(&self, vote: NewVote) -> StoreResult<Id> {
        let mut state = self.state.lock().await;
        if !state.polls.iter().any(|p| p.id == vote.poll_id && p.active) {
            return Err(StoreError::PollInactive);
        }
        if !state.voted.insert((vote.identity_id, vote.poll_id)) {
            return Err(StoreError::Duplicate);
        }
        let id = Id::new();
        state.votes.push(Vote { id, vote });
        Ok(id)
    }

    async fn vote(&self, identity_id: Id, poll_id: Id) -> StoreResult<Option<Vote>> {
        let state = self.state.lock().await;
        let vote = state
            .votes
            .iter()
            .find(|v| v.identity_id == identity_id && v.poll_id == poll_id)
            .cloned();
        Ok(vote)
    }

    async fn votes(&self, poll_id: Id) -> StoreResult<Vec<Vote>> {
        let state = self.state.lock().await;
        let votes = state
            .votes
            .iter()
            .rev()
            .filter(|v| v.poll_id == poll_id)
            .cloned()
            .collect();
        Ok(votes)
    }

    async fn option_counts(&self, poll_id: Id) -> StoreResult<HashMap<OptionId, u64>> {
        let state = self.state.lock().await;
        let mut counts = HashMap::new();
        for vote in state.votes.iter().filter(|v| v.poll_id == poll_id) {
            *counts.entry(vote.option).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn vote(identity_id: Id, poll_id: Id, option: OptionId) -> NewVote {
        NewVote {
            identity_id,
            poll_id,
            option,
            cast_at: Utc::now(),
        }
    }

    #[rocket::async_test]
    async fn duplicate_identity_values_rejected() {
        let store = MemoryStore::new();
        store.insert_identity(NewIdentity::example()).await.unwrap();

        let result = store.insert_identity(NewIdentity::example()).await;
        assert!(matches!(result, Err(StoreError::Duplicate)));

        // A different channel value is fine.
        store
            .insert_identity(NewIdentity::example_email())
            .await
            .unwrap();
        assert_eq!(store.identities().await.unwrap().len(), 2);
    }

    #[rocket::async_test]
    async fn pending_code_taken_once() {
        let store = MemoryStore::new();
        let id = store.insert_identity(NewIdentity::example()).await.unwrap();
        let pending = PendingCode::new(Channel::Phone, Utc::now(), Duration::seconds(300));
        assert!(store.set_pending_code(id, &pending).await.unwrap());

        let wrong: Code = if pending.code.to_string() == "000000" {
            "111111".parse().unwrap()
        } else {
            "000000".parse().unwrap()
        };
        assert_eq!(store.take_pending_code(id, &wrong).await.unwrap(), None);

        let taken = store.take_pending_code(id, &pending.code).await.unwrap();
        assert_eq!(taken, Some(pending.clone()));
        assert_eq!(store.take_pending_code(id, &pending.code).await.unwrap(), None);
    }

    #[rocket::async_test]
    async fn channel_value_moves_with_identity() {
        let store = MemoryStore::new();
        let ada = store.insert_identity(NewIdentity::example()).await.unwrap();
        let grace = store
            .insert_identity(NewIdentity::example_email())
            .await
            .unwrap();

        // Grace's email cannot be claimed by Ada.
        let result = store
            .set_channel_value(ada, &ChannelValue::example_email())
            .await;
        assert!(matches!(result, Err(StoreError::Duplicate)));

        // Re-setting your own value is a no-op.
        assert!(store
            .set_channel_value(grace, &ChannelValue::example_email())
            .await
            .unwrap());

        let found = store
            .identity_by_value(&ChannelValue::example_email())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, grace);
    }

    #[rocket::async_test]
    async fn one_active_poll() {
        let store = MemoryStore::new();
        let first = store.insert_active_poll(NewPoll::example()).await.unwrap();
        let second = store.insert_active_poll(NewPoll::example()).await.unwrap();

        let polls = store.polls().await.unwrap();
        assert_eq!(polls.iter().filter(|p| p.active).count(), 1);
        assert_eq!(polls[0].id, second);
        assert!(!store.poll(first).await.unwrap().unwrap().active);
        assert_eq!(store.active_poll().await.unwrap().unwrap().id, second);
    }

    #[rocket::async_test]
    async fn one_vote_per_identity_per_poll() {
        let store = MemoryStore::new();
        let voter = Id::new();
        let poll = store.insert_active_poll(NewPoll::example()).await.unwrap();

        store.insert_vote(vote(voter, poll, 1)).await.unwrap();
        let result = store.insert_vote(vote(voter, poll, 2)).await;
        assert!(matches!(result, Err(StoreError::Duplicate)));
        store.insert_vote(vote(Id::new(), poll, 1)).await.unwrap();

        let counts = store.option_counts(poll).await.unwrap();
        assert_eq!(counts.get(&1), Some(&2));
        assert_eq!(counts.get(&2), None);
        assert_eq!(store.votes(poll).await.unwrap().len(), 2);
        assert_eq!(store.vote(voter, poll).await.unwrap().unwrap().option, 1);

        // The same identity may vote again once a new poll is active.
        let next = store.insert_active_poll(NewPoll::example()).await.unwrap();
        store.insert_vote(vote(voter, next, 2)).await.unwrap();
    }

    #[rocket::async_test]
    async fn votes_only_in_active_poll() {
        let store = MemoryStore::new();
        let voter = Id::new();

        let result = store.insert_vote(vote(voter, Id::new(), 1)).await;
        assert!(matches!(result, Err(StoreError::PollInactive)));

        let first = store.insert_active_poll(NewPoll::example()).await.unwrap();
        store.insert_active_poll(NewPoll::example()).await.unwrap();
        let result = store.insert_vote(vote(voter, first, 1)).await;
        assert!(matches!(result, Err(StoreError::PollInactive)));
        assert!(store.votes(first).await.unwrap().is_empty());
        assert_eq!(store.vote(voter, first).await.unwrap(), None);
    }

    #[rocket::async_test]
    async fn replacing_value_clears_its_pending_code() {
        let store = MemoryStore::new();
        let id = store.insert_identity(NewIdentity::example()).await.unwrap();
        let pending = PendingCode::new(Channel::Phone, Utc::now(), Duration::seconds(300));
        store.set_pending_code(id, &pending).await.unwrap();

        // A code for another channel survives.
        store
            .set_channel_value(id, &ChannelValue::example_email())
            .await
            .unwrap();
        let identity = store.identity(id).await.unwrap().unwrap();
        assert_eq!(identity.pending, Some(pending.clone()));

        let other_phone = ChannelValue::Phone("+441234567891".parse().unwrap());
        store.set_channel_value(id, &other_phone).await.unwrap();
        let identity = store.identity(id).await.unwrap().unwrap();
        assert_eq!(identity.pending, None);
        assert_eq!(store.take_pending_code(id, &pending.code).await.unwrap(), None);
    }

    #[rocket::async_test]
    async fn identities_by_id() {
        let store = MemoryStore::new();
        let ada = store.insert_identity(NewIdentity::example()).await.unwrap();
        let grace = store
            .insert_identity(NewIdentity::example_email())
            .await
            .unwrap();

        let found = store.identities_in(&[grace, Id::new()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, grace);
        assert!(store.identities_in(&[]).await.unwrap().is_empty());
        assert_eq!(store.identities_in(&[ada, grace]).await.unwrap().len(), 2);
    }
}
