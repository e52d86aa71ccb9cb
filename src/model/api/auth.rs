use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    api::{identity::ChannelRequest, ApiId},
    channel::{Channel, ChannelValue},
};

/// Name of the private cookie carrying a voter's session token.
pub const SESSION_COOKIE: &str = "session";

/// Name of the private cookie carrying an admin session token.
pub const ADMIN_SESSION_COOKIE: &str = "admin_session";

/// Which identity a code is being submitted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityRef {
    Id(ApiId),
    Value(ChannelValue),
}

/// A code submission. The identity is given either by ID, or by the
/// channel value it registered with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<ApiId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub code: String,
}

impl VerifyRequest {
    pub fn target(&self) -> Result<IdentityRef> {
        match (self.identity, self.channel, &self.value) {
            (Some(id), None, None) => Ok(IdentityRef::Id(id)),
            (None, Some(channel), Some(value)) => ChannelRequest {
                channel,
                value: value.clone(),
            }
            .parse()
            .map(IdentityRef::Value),
            _ => Err(Error::bad_request(
                "Give either `identity`, or both `channel` and `value`".to_string(),
            )),
        }
    }
}

/// Admin login.
#[derive(Clone, Serialize, Deserialize)]
pub struct AdminLogin {
    pub password: String,
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl VerifyRequest {
        pub fn for_id(identity: ApiId, code: String) -> Self {
            Self {
                identity: Some(identity),
                channel: None,
                value: None,
                code,
            }
        }

        pub fn for_value(value: ChannelValue, code: String) -> Self {
            let contact = ChannelRequest::from(value);
            Self {
                identity: None,
                channel: Some(contact.channel),
                value: Some(contact.value),
                code,
            }
        }
    }

    impl AdminLogin {
        pub fn example() -> Self {
            Self {
                password: crate::TEST_ADMIN_PASSWORD.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rocket::serde::json::{self, json};

    use crate::model::mongodb::Id;

    use super::*;

    #[test]
    fn target_by_id_or_value() {
        let id = Id::new();
        let request: VerifyRequest =
            json::from_value(json!({ "identity": id.to_string(), "code": "042017" })).unwrap();
        assert_eq!(request.target().unwrap(), IdentityRef::Id(id.into()));

        let request: VerifyRequest = json::from_value(json!({
            "channel": "phone",
            "value": "+441234567890",
            "code": "042017",
        }))
        .unwrap();
        assert_eq!(
            request.target().unwrap(),
            IdentityRef::Value(ChannelValue::example_phone())
        );
    }

    #[test]
    fn ambiguous_target() {
        let id = Id::new();
        let both = VerifyRequest {
            channel: Some(Channel::Phone),
            value: Some("+441234567890".to_string()),
            ..VerifyRequest::for_id(id.into(), "042017".to_string())
        };
        assert_eq!(both.target().unwrap_err().kind(), "bad_request");

        let neither = VerifyRequest {
            identity: None,
            ..both
        };
        let neither = VerifyRequest {
            value: None,
            ..neither
        };
        assert_eq!(neither.target().unwrap_err().kind(), "bad_request");
    }
}
