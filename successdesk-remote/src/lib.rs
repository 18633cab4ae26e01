//! Hosted-database backend for SuccessDesk sync.
//!
//! [`RestBackend`] replays queued operations against a PostgREST endpoint
//! (the REST layer in front of the hosted Postgres tables).

pub mod config;
pub mod error;
pub mod rest_backend;

pub use config::RemoteConfig;
pub use error::{RemoteError, RemoteResult};
pub use rest_backend::RestBackend;
