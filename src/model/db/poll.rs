use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Options are numbered from 1 in the order they were given.
pub type OptionId = u32;

/// A single answer a voter can choose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: OptionId,
    pub text: String,
}

/// Core poll data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCore {
    pub question: String,
    /// Ordered options.
    pub options: Vec<PollOption>,
    /// Only one poll may ever be active at once.
    pub active: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl PollCore {
    /// Create a new, active poll. Labels must already be validated.
    pub fn new(question: String, labels: Vec<String>, created_at: DateTime<Utc>) -> Self {
        let options = (1..)
            .zip(labels)
            .map(|(id, text)| PollOption { id, text })
            .collect();
        Self {
            question,
            options,
            active: true,
            created_at,
        }
    }

    /// Look up an option of this poll.
    pub fn option(&self, id: OptionId) -> Option<&PollOption> {
        self.options.iter().find(|option| option.id == id)
    }
}

/// A poll without an ID.
pub type NewPoll = PollCore;

/// A poll from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub poll: PollCore,
}

impl Deref for Poll {
    type Target = PollCore;

    fn deref(&self) -> &Self::Target {
        &self.poll
    }
}

impl DerefMut for Poll {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.poll
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl PollCore {
        pub fn example() -> Self {
            Self::new(
                "Which team should win?".to_string(),
                vec![
                    "Team A".to_string(),
                    "Team B".to_string(),
                    "Team C".to_string(),
                ],
                Utc::now(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_are_numbered_from_one() {
        let poll = NewPoll::example();
        let ids = poll.options.iter().map(|o| o.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(poll.option(2).unwrap().text, "Team B");
        assert!(poll.option(0).is_none());
        assert!(poll.option(4).is_none());
        assert!(poll.active);
    }
}
