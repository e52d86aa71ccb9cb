use log::info;
use thiserror::Error;

use crate::model::{channel::ChannelValue, otp::Code};

#[derive(Debug, Error)]
#[error("Failed to deliver code to {destination}: {reason}")]
pub struct DeliveryError {
    pub destination: String,
    pub reason: String,
}

/// Delivers one-time codes to the channel they were issued for.
///
/// Codes are always returned to the caller of
/// [`CodeIssuer::issue`](super::CodeIssuer::issue) as well; a notifier is
/// the hook for sending them out of band.
#[rocket::async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, destination: &ChannelValue, code: &Code) -> Result<(), DeliveryError>;
}

/// Pretends to send codes. The code itself is never logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct DemoNotifier;

#[rocket::async_trait]
impl Notifier for DemoNotifier {
    async fn deliver(&self, destination: &ChannelValue, _code: &Code) -> Result<(), DeliveryError> {
        info!(
            "Demo mode: one-time code for {} {destination} returned to caller instead of sent",
            destination.channel()
        );
        Ok(())
    }
}
