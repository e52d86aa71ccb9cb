use chrono::{DateTime, Duration, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::channel::Channel;

pub use self::code::{Code, ParseError, LENGTH as CODE_LENGTH};

mod code;

/// The one outstanding code for an identity, as stored alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCode {
    pub code: Code,
    /// The channel this code proves control of once verified.
    pub channel: Channel,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expire_at: DateTime<Utc>,
}

impl PendingCode {
    /// A fresh random code for `channel`, valid for `ttl` from `now`.
    pub fn new(channel: Channel, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            code: Code::random(),
            channel,
            expire_at: now + ttl,
        }
    }

    /// Has this code expired at the instant `now`?
    /// A code is still valid at exactly its expiry time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expire_at
    }
}
