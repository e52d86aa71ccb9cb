use log::{debug, error};
use mongodb::error::Error as DbError;
use rocket::{
    http::Status,
    response::{self, Responder},
    serde::json::Json,
    Request,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{db::OptionId, mongodb::Id};
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} is already registered to a verified identity")]
    AlreadyRegistered(String),
    #[error("No one-time code has been issued")]
    NoCodeIssued,
    #[error("The one-time code has expired")]
    Expired,
    #[error("The one-time code does not match")]
    Mismatch,
    #[error("Invalid poll: {0}")]
    InvalidPoll(String),
    #[error("Poll {0} is not the active poll")]
    PollNotActive(Id),
    #[error("Option {option} does not belong to poll {poll}")]
    InvalidOption { poll: Id, option: OptionId },
    #[error("Already voted in poll {0}")]
    AlreadyVoted(Id),
    #[error("No channel of this identity has been verified")]
    NotVerified,
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Store(StoreError),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    pub fn not_found(what: String) -> Self {
        Self::Status(Status::NotFound, format!("{what} not found"))
    }

    pub fn bad_request(why: String) -> Self {
        Self::Status(Status::BadRequest, why)
    }

    pub fn status(&self) -> Status {
        match self {
            Self::AlreadyRegistered(_) | Self::PollNotActive(_) | Self::AlreadyVoted(_) => {
                Status::Conflict
            }
            Self::NoCodeIssued | Self::Expired | Self::Mismatch => Status::Unauthorized,
            Self::NotVerified => Status::Forbidden,
            Self::InvalidPoll(_) => Status::UnprocessableEntity,
            Self::InvalidOption { .. } => Status::NotFound,
            Self::Db(_) | Self::Store(_) => Status::InternalServerError,
            Self::Status(status, _) => *status,
        }
    }

    /// A stable, machine-readable name for the error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered(_) => "already_registered",
            Self::NoCodeIssued => "no_code_issued",
            Self::Expired => "expired",
            Self::Mismatch => "mismatch",
            Self::InvalidPoll(_) => "invalid_poll",
            Self::PollNotActive(_) => "poll_not_active",
            Self::InvalidOption { .. } => "invalid_option",
            Self::AlreadyVoted(_) => "already_voted",
            Self::NotVerified => "not_verified",
            Self::Db(_) | Self::Store(_) => "internal",
            Self::Status(status, _) if *status == Status::NotFound => "not_found",
            Self::Status(status, _) if *status == Status::BadRequest => "bad_request",
            Self::Status(_, _) => "other",
        }
    }
}

/// Storage errors that reach this point are unexpected: the engine maps the
/// duplicates it anticipates to domain errors itself.
impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Db(e) => Self::Db(e),
            other => Self::Store(other),
        }
    }
}

/// The JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let message = if status.code >= 500 {
            error!("{self}");
            "Internal server error".to_string()
        } else {
            debug!("{self}");
            self.to_string()
        };
        let body = ErrorBody {
            error: self.kind().to_string(),
            message,
        };
        (status, Json(body)).respond_to(req)
    }
}
