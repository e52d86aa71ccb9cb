use std::collections::HashSet;

use chrono::Utc;
use log::info;

use crate::error::{Error, Result};
use crate::model::{
    db::{NewPoll, Poll, PollOption},
    mongodb::Id,
};
use crate::store::SharedStore;

/// Minimum number of distinct, non-empty options in a poll.
pub const MIN_OPTIONS: usize = 2;

/// Polls, and which one of them is active.
#[derive(Clone)]
pub struct PollRegistry {
    store: SharedStore,
}

impl PollRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Create a poll and make it the only active one.
    ///
    /// Labels are trimmed and blank labels dropped before validation.
    pub async fn create_poll<S: AsRef<str>>(&self, question: &str, labels: &[S]) -> Result<Id> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidPoll("the question is empty".to_string()));
        }
        let labels = clean_labels(labels)?;

        let poll = NewPoll::new(question.to_string(), labels, Utc::now());
        let id = self.store.insert_active_poll(poll).await?;
        info!("Created poll {id}, now the active poll");
        Ok(id)
    }

    /// The poll currently accepting votes, if any.
    pub async fn get_active(&self) -> Result<Option<Poll>> {
        Ok(self.store.active_poll().await?)
    }

    pub async fn get(&self, id: Id) -> Result<Option<Poll>> {
        Ok(self.store.poll(id).await?)
    }

    /// Like [`Self::get`], but a missing poll is an error.
    pub async fn poll(&self, id: Id) -> Result<Poll> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Poll with ID '{id}'")))
    }

    pub async fn get_options(&self, id: Id) -> Result<Vec<PollOption>> {
        Ok(self.poll(id).await?.poll.options)
    }

    /// Every poll, newest first.
    pub async fn list(&self) -> Result<Vec<Poll>> {
        Ok(self.store.polls().await?)
    }
}

fn clean_labels<S: AsRef<str>>(labels: &[S]) -> Result<Vec<String>> {
    let labels = labels
        .iter()
        .map(|label| label.as_ref().trim())
        .filter(|label| !label.is_empty())
        .collect::<Vec<_>>();

    if labels.len() < MIN_OPTIONS {
        return Err(Error::InvalidPoll(format!(
            "at least {MIN_OPTIONS} non-empty options are required, got {}",
            labels.len()
        )));
    }
    let mut seen = HashSet::new();
    if let Some(duplicate) = labels.iter().find(|label| !seen.insert(**label)) {
        return Err(Error::InvalidPoll(format!(
            "option '{duplicate}' appears more than once"
        )));
    }

    Ok(labels.into_iter().map(str::to_string).collect())
}
