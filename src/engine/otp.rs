use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rocket::http::Status;

use crate::error::{Error, Result};
use crate::model::{
    channel::Channel,
    mongodb::Id,
    otp::{Code, PendingCode},
};
use crate::store::SharedStore;

use super::{identity::IdentityStore, notifier::Notifier};

/// A freshly issued one-time code.
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub identity: Id,
    pub code: Code,
    pub channel: Channel,
    pub expire_at: DateTime<Utc>,
}

/// Issues one-time codes and checks them.
#[derive(Clone)]
pub struct CodeIssuer {
    store: SharedStore,
    identities: IdentityStore,
    notifier: Arc<dyn Notifier>,
    ttl: Duration,
}

impl CodeIssuer {
    pub fn new(
        store: SharedStore,
        identities: IdentityStore,
        notifier: Arc<dyn Notifier>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            identities,
            notifier,
            ttl,
        }
    }

    /// How long an issued code stays valid.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a code for the identity's phone, or its email if it has no phone.
    pub async fn issue(&self, id: Id) -> Result<IssuedCode> {
        self.issue_at(id, None, Utc::now()).await
    }

    /// Issue a code for a specific channel of the identity.
    pub async fn issue_for(&self, id: Id, channel: Channel) -> Result<IssuedCode> {
        self.issue_at(id, Some(channel), Utc::now()).await
    }

    /// Issue a code as if the current time were `now`.
    /// Any previously pending code is replaced.
    pub async fn issue_at(
        &self,
        id: Id,
        channel: Option<Channel>,
        now: DateTime<Utc>,
    ) -> Result<IssuedCode> {
        let identity = self.identities.identity(id).await?;
        let channel = channel
            .or_else(|| identity.primary_channel())
            .ok_or_else(|| Error::bad_request(format!("Identity {id} has no channels")))?;
        let destination = identity
            .value(channel)
            .ok_or_else(|| Error::bad_request(format!("Identity {id} has no {channel}")))?;

        let pending = PendingCode::new(channel, now, self.ttl);
        if !self.store.set_pending_code(id, &pending).await? {
            return Err(Error::not_found(format!("Identity with ID '{id}'")));
        }
        if let Err(e) = self.notifier.deliver(&destination, &pending.code).await {
            // Withdraw the undelivered code.
            self.store.take_pending_code(id, &pending.code).await?;
            warn!("{e}");
            return Err(Error::Status(Status::InternalServerError, e.to_string()));
        }
        debug!("Issued a {channel} code for identity {id}");

        Ok(IssuedCode {
            identity: id,
            code: pending.code,
            channel,
            expire_at: pending.expire_at,
        })
    }

    /// Check a submitted code, returning the channel it verified.
    pub async fn verify(&self, id: Id, submitted: &str) -> Result<Channel> {
        self.verify_at(id, submitted, Utc::now()).await
    }

    /// Check a submitted code as if the current time were `now`.
    ///
    /// A code can be used at most once: the pending code is cleared by an
    /// atomic compare-and-clear, so a replay (or the loser of a race) sees
    /// [`Error::NoCodeIssued`].
    pub async fn verify_at(&self, id: Id, submitted: &str, now: DateTime<Utc>) -> Result<Channel> {
        let identity = self.identities.identity(id).await?;
        let pending = identity.identity.pending.ok_or(Error::NoCodeIssued)?;
        if pending.is_expired(now) {
            return Err(Error::Expired);
        }
        if submitted != pending.code.to_string() {
            return Err(Error::Mismatch);
        }

        let taken = self
            .store
            .take_pending_code(id, &pending.code)
            .await?
            .ok_or(Error::NoCodeIssued)?;
        self.identities.mark_verified(id, taken.channel).await?;
        info!("Identity {id} passed a {} challenge", taken.channel);
        Ok(taken.channel)
    }
}
