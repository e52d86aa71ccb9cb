use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{Ballot, OptionTally, Tally};
use crate::model::{
    api::ApiId,
    db::{OptionId, Poll, PollOption, Vote},
};

/// Poll options as submitted: either a list, or one comma-separated string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionLabels {
    List(Vec<String>),
    Csv(String),
}

impl OptionLabels {
    /// The raw labels, not yet trimmed or checked.
    pub fn labels(&self) -> Vec<&str> {
        match self {
            Self::List(labels) => labels.iter().map(String::as_str).collect(),
            Self::Csv(labels) => labels.split(',').collect(),
        }
    }
}

/// A new poll, as submitted by an admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSpec {
    pub question: String,
    pub options: OptionLabels,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollView {
    pub id: ApiId,
    pub question: String,
    pub options: Vec<PollOption>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Poll> for PollView {
    fn from(poll: Poll) -> Self {
        Self {
            id: poll.id.into(),
            question: poll.poll.question,
            options: poll.poll.options,
            active: poll.poll.active,
            created_at: poll.poll.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionResult {
    pub id: OptionId,
    pub text: String,
    pub votes: u64,
    pub percentage: f64,
}

impl From<OptionTally> for OptionResult {
    fn from(tally: OptionTally) -> Self {
        Self {
            id: tally.id,
            text: tally.text,
            votes: tally.votes,
            percentage: tally.percentage,
        }
    }
}

/// Public results of a poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResults {
    pub id: ApiId,
    pub active: bool,
    pub question: String,
    pub total: u64,
    pub options: Vec<OptionResult>,
}

impl From<Tally> for PollResults {
    fn from(tally: Tally) -> Self {
        Self {
            id: tally.poll_id.into(),
            active: tally.active,
            question: tally.question,
            total: tally.total,
            options: tally.options.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub option: OptionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCast {
    pub id: ApiId,
    pub poll: ApiId,
    pub option: OptionId,
}

/// Whether the current voter has voted in a poll, and for what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteStatus {
    pub voted: bool,
    pub option: Option<OptionId>,
    pub cast_at: Option<DateTime<Utc>>,
}

impl From<Option<Vote>> for VoteStatus {
    fn from(vote: Option<Vote>) -> Self {
        Self {
            voted: vote.is_some(),
            option: vote.as_ref().map(|v| v.option),
            cast_at: vote.as_ref().map(|v| v.cast_at),
        }
    }
}

/// One row of the raw results view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotView {
    pub id: ApiId,
    pub option: OptionId,
    pub cast_at: DateTime<Utc>,
    pub identity: ApiId,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl From<Ballot> for BallotView {
    fn from(ballot: Ballot) -> Self {
        let Ballot { vote, identity } = ballot;
        Self {
            id: vote.id.into(),
            option: vote.option,
            cast_at: vote.cast_at,
            identity: identity.id.into(),
            phone: identity.phone.as_ref().map(ToString::to_string),
            email: identity.email.as_ref().map(ToString::to_string),
            name: identity.identity.name,
        }
    }
}


#[cfg(test)]
mod tests {
    use rocket::serde::json::{self, json};

    use super::*;

    #[test]
    fn options_as_list_or_csv() {
        let spec: PollSpec =
            json::from_value(json!({ "question": "Q?", "options": ["Yes", "No"] })).unwrap();
        assert_eq!(spec.options.labels(), ["Yes", "No"]);

        let spec: PollSpec =
            json::from_value(json!({ "question": "Q?", "options": "Yes, No,," })).unwrap();
        assert_eq!(spec.options.labels(), ["Yes", " No", "", ""]);
    }

    #[test]
    fn results_shape() {
        let tally = Tally {
            poll_id: crate::model::mongodb::Id::new(),
            question: "Q?".to_string(),
            active: true,
            total: 1,
            options: vec![OptionTally {
                id: 1,
                text: "Yes".to_string(),
                votes: 1,
                percentage: 100.0,
            }],
        };
        let value = json::to_value(PollResults::from(tally.clone())).unwrap();
        assert_eq!(value["id"], json!(tally.poll_id.to_string()));
        assert_eq!(value["total"], json!(1));
        assert_eq!(
            value["options"][0],
            json!({ "id": 1, "text": "Yes", "votes": 1, "percentage": 100.0 })
        );
    }

    #[test]
    fn no_vote_status() {
        let status = VoteStatus::from(None);
        assert!(!status.voted);
        assert_eq!(status.option, None);
    }
}
