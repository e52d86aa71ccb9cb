//! The verification and voting core.
//!
//! Each component is a cheap, cloneable handle over a shared [`Store`]
//! and is placed into Rocket's managed state on ignition.
//!
//! [`Store`]: crate::store::Store

use std::sync::Arc;

use chrono::Duration;

use crate::store::SharedStore;

pub use self::identity::IdentityStore;
pub use self::ledger::{Ballot, OptionTally, Tally, VoteLedger};
pub use self::notifier::{DeliveryError, DemoNotifier, Notifier};
pub use self::otp::{CodeIssuer, IssuedCode};
pub use self::poll::{PollRegistry, MIN_OPTIONS};
pub use self::session::{Principal, SessionBinder, SessionToken};

mod identity;
mod ledger;
mod notifier;
mod otp;
mod poll;
mod session;

/// All five core components, wired to one store.
#[derive(Clone)]
pub struct Engine {
    pub identities: IdentityStore,
    pub codes: CodeIssuer,
    pub sessions: SessionBinder,
    pub polls: PollRegistry,
    pub ledger: VoteLedger,
}

impl Engine {
    pub fn new(
        store: SharedStore,
        notifier: Arc<dyn Notifier>,
        otp_ttl: Duration,
        auth_ttl: Duration,
    ) -> Self {
        let identities = IdentityStore::new(store.clone());
        let polls = PollRegistry::new(store.clone());
        Self {
            codes: CodeIssuer::new(store.clone(), identities.clone(), notifier, otp_ttl),
            sessions: SessionBinder::new(auth_ttl),
            ledger: VoteLedger::new(store, identities.clone(), polls.clone()),
            identities,
            polls,
        }
    }
}
