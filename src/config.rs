use std::sync::Arc;

use argon2::Error as Argon2Error;
use chrono::{Duration, Utc};
use log::{debug, error, info};
use rand::Rng;
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::{self, sync::Mutex, task::JoinHandle, time},
    Build, Orbit, Rocket,
};
use serde::Deserialize;

use crate::engine::{DemoNotifier, Engine, SessionBinder};
use crate::store::{MemoryStore, MongoStore, SharedStore};

/// Which storage backend to run against.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Mongodb,
    Memory,
}

/// The configuration as read from `Rocket.toml` and `ROCKET_*` environment
/// variables, before the admin password is hashed.
#[derive(Deserialize)]
struct RawConfig {
    otp_ttl: u32,
    auth_ttl: u32,
    #[serde(default = "default_sweep_interval")]
    sweep_interval: u32,
    #[serde(default)]
    store: StoreKind,
    // secrets
    admin_password: String,
}

fn default_sweep_interval() -> u32 {
    60
}

/// Application configuration. This struct becomes managed state and can be
/// inspected by any endpoint.
pub struct Config {
    otp_ttl: u32,
    auth_ttl: u32,
    sweep_interval: u32,
    store: StoreKind,
    admin_password_hash: String,
}

impl Config {
    fn from_raw(raw: RawConfig) -> Result<Self, Argon2Error> {
        let mut salt = [0_u8; 16];
        rand::thread_rng().fill(&mut salt);
        let admin_password_hash = argon2::hash_encoded(
            raw.admin_password.as_bytes(),
            &salt,
            &argon2::Config::default(),
        )?;
        Ok(Self {
            otp_ttl: raw.otp_ttl,
            auth_ttl: raw.auth_ttl,
            sweep_interval: raw.sweep_interval,
            store: raw.store,
            admin_password_hash,
        })
    }

    /// Valid lifetime of one-time codes in seconds.
    pub fn otp_ttl(&self) -> Duration {
        Duration::seconds(self.otp_ttl.into())
    }

    /// Valid lifetime of sessions in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Seconds between sweeps of expired sessions.
    pub fn sweep_interval(&self) -> time::Duration {
        time::Duration::from_secs(self.sweep_interval.max(1).into())
    }

    pub fn store(&self) -> StoreKind {
        self.store
    }

    /// Check a password attempt against the configured admin password.
    pub fn verify_admin_password(&self, password: &str) -> bool {
        argon2::verify_encoded(&self.admin_password_hash, password.as_bytes()).unwrap_or(false)
    }
}

/// A fairing that loads the application config, hashes the admin password,
/// and puts the result in managed state.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let raw = match rocket.figment().extract::<RawConfig>() {
            Ok(raw) => raw,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let config = match Config::from_raw(raw) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to hash admin password: {e}");
                return Err(rocket);
            }
        };
        debug!("Loaded application config, using the {:?} store", config.store);

        // Manage the state.
        Ok(rocket.manage(config))
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    #[serde(default = "default_db_name")]
    db_name: String,
    // secrets
    db_uri: String,
}

fn default_db_name() -> String {
    "pollbooth".to_string()
}

/// A fairing that builds the configured store, performs any setup necessary,
/// and places the core components into managed state. Must be attached after
/// [`ConfigFairing`].
pub struct EngineFairing;

impl EngineFairing {
    async fn connect(rocket: &Rocket<Build>, kind: StoreKind) -> Option<SharedStore> {
        match kind {
            StoreKind::Memory => {
                info!("Using in-memory store, nothing will be persisted");
                Some(Arc::new(MemoryStore::new()))
            }
            StoreKind::Mongodb => {
                let config = match rocket.figment().extract::<DbConfig>() {
                    Ok(config) => config,
                    Err(e) => {
                        error!("Failed to load database config");
                        rocket::config::pretty_print_error(e);
                        return None;
                    }
                };
                info!("Loaded database config, connecting...");
                match MongoStore::connect(&config.db_uri, &config.db_name).await {
                    Ok(store) => {
                        info!("...database connection online!");
                        Some(Arc::new(store))
                    }
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        None
                    }
                }
            }
        }
    }
}

#[rocket::async_trait]
impl Fairing for EngineFairing {
    fn info(&self) -> Info {
        Info {
            name: "Engine",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let Some(config) = rocket.state::<Config>() else {
            error!("Engine fairing attached without config");
            return Err(rocket);
        };
        let (kind, otp_ttl, auth_ttl) = (config.store(), config.otp_ttl(), config.auth_ttl());

        let Some(store) = Self::connect(&rocket, kind).await else {
            return Err(rocket);
        };
        let engine = Engine::new(store, Arc::new(DemoNotifier), otp_ttl, auth_ttl);

        Ok(rocket
            .manage(engine.identities)
            .manage(engine.codes)
            .manage(engine.sessions)
            .manage(engine.polls)
            .manage(engine.ledger))
    }
}

/// A fairing that periodically removes expired sessions while the server is
/// running.
#[derive(Default)]
pub struct SessionSweeper {
    task: Mutex<Option<JoinHandle<()>>>,
}

#[rocket::async_trait]
impl Fairing for SessionSweeper {
    fn info(&self) -> Info {
        Info {
            name: "Session sweeper",
            kind: Kind::Liftoff | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let (Some(config), Some(sessions)) =
            (rocket.state::<Config>(), rocket.state::<SessionBinder>())
        else {
            error!("Session sweeper has no sessions to sweep");
            return;
        };
        let sessions = sessions.clone();
        let mut interval = time::interval(config.sweep_interval());

        let task = tokio::spawn(async move {
            loop {
                interval.tick().await;
                let removed = sessions.sweep(Utc::now()).await;
                if removed > 0 {
                    debug!("Swept {removed} expired sessions");
                }
            }
        });
        *self.task.lock().await = Some(task);
    }

    async fn on_shutdown(&self, _rocket: &Rocket<Orbit>) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(store: StoreKind) -> RawConfig {
        RawConfig {
            otp_ttl: 300,
            auth_ttl: 3600,
            sweep_interval: 0,
            store,
            admin_password: "correct horse".to_string(),
        }
    }

    #[test]
    fn admin_password_is_hashed() {
        let config = Config::from_raw(raw(StoreKind::Memory)).unwrap();
        assert!(!config.admin_password_hash.contains("correct horse"));
        assert!(config.verify_admin_password("correct horse"));
        assert!(!config.verify_admin_password("correct horse "));
        assert!(!config.verify_admin_password(""));
    }

    #[test]
    fn durations() {
        let config = Config::from_raw(raw(StoreKind::Mongodb)).unwrap();
        assert_eq!(config.otp_ttl(), Duration::minutes(5));
        assert_eq!(config.auth_ttl(), Duration::hours(1));
        assert_eq!(config.sweep_interval(), time::Duration::from_secs(1));
    }

    #[test]
    fn store_kind_from_figment() {
        let figment = rocket::Config::figment()
            .merge(("otp_ttl", 300))
            .merge(("auth_ttl", 3600))
            .merge(("admin_password", "secret"))
            .merge(("store", "memory"));
        let raw = figment.extract::<RawConfig>().unwrap();
        assert_eq!(raw.store, StoreKind::Memory);
        assert_eq!(raw.sweep_interval, default_sweep_interval());
    }

    #[rocket::async_test]
    async fn ignite_manages_engine() {
        let rocket = crate::test_rocket().ignite().await.unwrap();

        let config = rocket.state::<Config>().unwrap();
        assert_eq!(config.store(), StoreKind::Memory);
        let sessions = rocket.state::<SessionBinder>().unwrap();
        assert_eq!(sessions.ttl(), config.auth_ttl());
        assert!(rocket.state::<crate::engine::VoteLedger>().is_some());
    }
}
