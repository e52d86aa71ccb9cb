//! Data types, in their database and API forms.

pub mod api;
pub mod channel;
pub mod db;
pub mod mongodb;
pub mod otp;
