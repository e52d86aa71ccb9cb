use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    channel::{Channel, ChannelValue, Email, Phone},
    mongodb::Id,
    otp::PendingCode,
};

/// Core identity data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCore {
    /// Display name given at registration.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<Phone>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<Email>,
    pub phone_verified: bool,
    pub email_verified: bool,
    /// The single outstanding one-time code, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingCode>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl IdentityCore {
    /// A new, unverified identity reachable on the given channel only.
    pub fn new(value: ChannelValue, name: String, created_at: DateTime<Utc>) -> Self {
        let mut identity = Self {
            name,
            phone: None,
            email: None,
            phone_verified: false,
            email_verified: false,
            pending: None,
            created_at,
        };
        identity.set_value(value);
        identity
    }

    /// The identity's value on the given channel, if it has one.
    pub fn value(&self, channel: Channel) -> Option<ChannelValue> {
        match channel {
            Channel::Phone => self.phone.clone().map(ChannelValue::Phone),
            Channel::Email => self.email.clone().map(ChannelValue::Email),
        }
    }

    /// Record a value on its channel. This does not touch the verified flag.
    pub fn set_value(&mut self, value: ChannelValue) {
        match value {
            ChannelValue::Phone(phone) => self.phone = Some(phone),
            ChannelValue::Email(email) => self.email = Some(email),
        }
    }

    pub fn is_verified_on(&self, channel: Channel) -> bool {
        match channel {
            Channel::Phone => self.phone_verified,
            Channel::Email => self.email_verified,
        }
    }

    /// Is this identity eligible to vote?
    pub fn is_verified(&self) -> bool {
        self.phone_verified || self.email_verified
    }

    /// The channel codes go to by default: phone if known, else email.
    pub fn primary_channel(&self) -> Option<Channel> {
        if self.phone.is_some() {
            Some(Channel::Phone)
        } else if self.email.is_some() {
            Some(Channel::Email)
        } else {
            None
        }
    }

    /// Set the channel's verified flag and clear any pending code.
    pub fn mark_verified(&mut self, channel: Channel) {
        match channel {
            Channel::Phone => self.phone_verified = true,
            Channel::Email => self.email_verified = true,
        }
        self.pending = None;
    }
}

/// An identity without an ID.
pub type NewIdentity = IdentityCore;

/// An identity from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub identity: IdentityCore,
}

impl Deref for Identity {
    type Target = IdentityCore;

    fn deref(&self) -> &Self::Target {
        &self.identity
    }
}

impl DerefMut for Identity {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.identity
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl IdentityCore {
        pub fn example() -> Self {
            Self::new(ChannelValue::example_phone(), "Ada".to_string(), Utc::now())
        }

        pub fn example_email() -> Self {
            Self::new(ChannelValue::example_email(), "Grace".to_string(), Utc::now())
        }
    }

    impl Identity {
        pub fn example() -> Self {
            Self {
                id: Id::new(),
                identity: IdentityCore::example(),
            }
        }
    }
}
