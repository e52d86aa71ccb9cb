use std::fmt::{Display, Formatter};
use std::str::FromStr;

use phonenumber::{Mode, PhoneNumber};
use rocket::FromFormField;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The two channels an identity can be reached and verified on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Phone,
    Email,
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phone => write!(f, "phone"),
            Self::Email => write!(f, "email"),
        }
    }
}

/// A voter's phone number, held in international form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Phone {
    inner: PhoneNumber,
}

// Numbers are equal when they format to the same E.164 string.
impl PartialEq for Phone {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for Phone {}

impl Display for Phone {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner.format().mode(Mode::E164))
    }
}

impl FromStr for Phone {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Phone {
            inner: phonenumber::parse(None, s.trim())?,
        })
    }
}

impl TryFrom<String> for Phone {
    type Error = ChannelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Phone> for String {
    fn from(phone: Phone) -> Self {
        phone.to_string()
    }
}

/// A voter's email address, trimmed and lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Display for Email {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Email {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let email = s.trim().to_lowercase();
        let well_formed = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            }
            None => false,
        };
        if !well_formed || email.contains(char::is_whitespace) {
            return Err(ChannelError::InvalidEmail(s.to_string()));
        }
        Ok(Email(email))
    }
}

impl TryFrom<String> for Email {
    type Error = ChannelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

/// A concrete value on one channel: the unique key of an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelValue {
    Phone(Phone),
    Email(Email),
}

impl ChannelValue {
    /// Parse a raw user-supplied value for the given channel.
    pub fn parse(channel: Channel, raw: &str) -> Result<Self, ChannelError> {
        match channel {
            Channel::Phone => raw.parse().map(Self::Phone),
            Channel::Email => raw.parse().map(Self::Email),
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::Phone(_) => Channel::Phone,
            Self::Email(_) => Channel::Email,
        }
    }
}

impl Display for ChannelValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phone(phone) => phone.fmt(f),
            Self::Email(email) => email.fmt(f),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid phone number: {0}")]
    InvalidPhone(#[from] phonenumber::ParseError),
    #[error("invalid email address: '{0}'")]
    InvalidEmail(String),
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Phone {
        pub fn example() -> Self {
            "+441234567890".parse().unwrap()
        }

        pub fn example2() -> Self {
            "+441234567891".parse().unwrap()
        }
    }

    impl Email {
        pub fn example() -> Self {
            "voter@example.com".parse().unwrap()
        }
    }

    impl ChannelValue {
        pub fn example_phone() -> Self {
            Self::Phone(Phone::example())
        }

        pub fn example_email() -> Self {
            Self::Email(Email::example())
        }
    }
}
