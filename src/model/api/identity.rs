use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::IssuedCode;
use crate::error::{Error, Result};
use crate::model::{
    api::ApiId,
    channel::{Channel, ChannelValue},
    db::Identity,
};

/// Longest display name accepted at registration.
pub const MAX_NAME_LENGTH: usize = 100;

/// A raw value on a channel, as typed by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRequest {
    pub channel: Channel,
    pub value: String,
}

impl ChannelRequest {
    pub fn parse(&self) -> Result<ChannelValue> {
        ChannelValue::parse(self.channel, &self.value).map_err(|e| Error::bad_request(e.to_string()))
    }
}

impl From<ChannelValue> for ChannelRequest {
    fn from(value: ChannelValue) -> Self {
        Self {
            channel: value.channel(),
            value: value.to_string(),
        }
    }
}

/// A registration attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(flatten)]
    pub contact: ChannelRequest,
    pub name: String,
}

impl RegisterRequest {
    /// The parsed channel value and the trimmed display name.
    pub fn validate(&self) -> Result<(ChannelValue, String)> {
        let value = self.contact.parse()?;
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::bad_request("Name must not be empty".to_string()));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(Error::bad_request(format!(
                "Name must be at most {MAX_NAME_LENGTH} characters"
            )));
        }
        Ok((value, name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registered {
    pub id: ApiId,
}

/// A freshly issued code. In this deployment the code itself is handed back
/// to the caller instead of being delivered out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeIssued {
    pub identity: ApiId,
    pub channel: Channel,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl From<IssuedCode> for CodeIssued {
    fn from(issued: IssuedCode) -> Self {
        Self {
            identity: issued.identity.into(),
            channel: issued.channel,
            code: issued.code.to_string(),
            expires_at: issued.expire_at,
        }
    }
}

/// An identity as shown to its owner and to admins. Never includes the
/// pending code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityView {
    pub id: ApiId,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub phone_verified: bool,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Identity> for IdentityView {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id.into(),
            phone: identity.phone.as_ref().map(ToString::to_string),
            email: identity.email.as_ref().map(ToString::to_string),
            phone_verified: identity.phone_verified,
            email_verified: identity.email_verified,
            created_at: identity.created_at,
            name: identity.identity.name,
        }
    }
}
