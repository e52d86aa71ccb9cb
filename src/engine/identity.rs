use chrono::Utc;
use log::{debug, info};

use crate::error::{Error, Result};
use crate::model::{
    channel::{Channel, ChannelValue},
    db::{Identity, NewIdentity},
    mongodb::Id,
};
use crate::store::{SharedStore, StoreError};

/// Registered identities and their verification state.
#[derive(Clone)]
pub struct IdentityStore {
    store: SharedStore,
}

impl IdentityStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Register an identity for `value`, or return the existing one.
    ///
    /// Registering a value that already belongs to an identity verified on
    /// that channel fails with [`Error::AlreadyRegistered`]. Otherwise this is
    /// idempotent and the original name is kept.
    pub async fn register(&self, value: ChannelValue, name: &str) -> Result<Id> {
        if let Some(existing) = self.get_by_channel(&value).await? {
            return Self::reuse(existing, &value);
        }

        let identity = NewIdentity::new(value.clone(), name.to_string(), Utc::now());
        match self.store.insert_identity(identity).await {
            Ok(id) => {
                info!("Registered identity {id} for {}", value.channel());
                Ok(id)
            }
            // Lost a race with a concurrent registration of the same value.
            Err(StoreError::Duplicate) => match self.get_by_channel(&value).await? {
                Some(existing) => Self::reuse(existing, &value),
                None => Err(StoreError::Duplicate.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    fn reuse(existing: Identity, value: &ChannelValue) -> Result<Id> {
        if existing.is_verified_on(value.channel()) {
            Err(Error::AlreadyRegistered(value.to_string()))
        } else {
            debug!("Re-registration of unverified identity {}", existing.id);
            Ok(existing.id)
        }
    }

    pub async fn get_by_channel(&self, value: &ChannelValue) -> Result<Option<Identity>> {
        Ok(self.store.identity_by_value(value).await?)
    }

    pub async fn get(&self, id: Id) -> Result<Option<Identity>> {
        Ok(self.store.identity(id).await?)
    }

    /// Like [`Self::get`], but a missing identity is an error.
    pub async fn identity(&self, id: Id) -> Result<Identity> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Identity with ID '{id}'")))
    }

    /// Mark the channel verified and clear any pending code, making the
    /// identity eligible to vote.
    pub async fn mark_verified(&self, id: Id, channel: Channel) -> Result<()> {
        if self.store.mark_verified(id, channel).await? {
            info!("Identity {id} verified its {channel}");
            Ok(())
        } else {
            Err(Error::not_found(format!("Identity with ID '{id}'")))
        }
    }

    /// Attach a value on another channel to an existing identity, unverified.
    ///
    /// Fails with [`Error::AlreadyRegistered`] if another identity holds the
    /// value, and refuses to replace a value that has already been verified.
    pub async fn link_channel(&self, id: Id, value: ChannelValue) -> Result<()> {
        let identity = self.identity(id).await?;
        let channel = value.channel();
        if identity.value(channel).as_ref() == Some(&value) {
            return Ok(());
        }
        if identity.is_verified_on(channel) {
            return Err(Error::bad_request(format!(
                "Identity already has a verified {channel}"
            )));
        }

        match self.store.set_channel_value(id, &value).await {
            Ok(true) => {
                info!("Linked a {channel} to identity {id}");
                Ok(())
            }
            Ok(false) => Err(Error::not_found(format!("Identity with ID '{id}'"))),
            Err(StoreError::Duplicate) => Err(Error::AlreadyRegistered(value.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Every identity, newest first.
    pub async fn list(&self) -> Result<Vec<Identity>> {
        Ok(self.store.identities().await?)
    }
}
