#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

#[cfg(test)]
#[macro_use]
extern crate db_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, EngineFairing, SessionSweeper};
use crate::logging::LoggerFairing;

pub use crate::config::Config;

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod store;

/// Build the server from `Rocket.toml` and the environment.
pub fn build() -> Rocket<Build> {
    assemble(rocket::build())
}

/// Mount routes and attach the fairings that configure and run the engine.
/// The fairing order matters: the engine reads the config on ignition.
fn assemble(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(EngineFairing)
        .attach(SessionSweeper::default())
}

#[cfg(test)]
pub(crate) const TEST_ADMIN_PASSWORD: &str = "correct horse battery staple";

/// A server over a fresh in-memory store.
#[cfg(test)]
pub(crate) fn test_rocket() -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("store", "memory"))
        .merge(("otp_ttl", 300))
        .merge(("auth_ttl", 3600))
        .merge(("admin_password", TEST_ADMIN_PASSWORD));
    assemble(rocket::custom(figment))
}
