//! Online poll service: polls with options, duplicate-safe voting and cached results.
//!
//! Storage is SQLite through sqlx. Each vote is inserted and its option counter bumped in one
//! transaction, and a partial unique index over `(poll_id, voter_identifier)` keeps single-vote
//! polls at one vote per voter even under concurrent requests. Results are served through an
//! injected [`cache::ResultCache`] that the vote path invalidates after every commit.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod lifecycle;
pub mod models;
pub mod results;
pub mod routes;
pub mod state;
pub mod store;
pub mod voting;

pub use config::Config;
pub use error::{Error, Result};
pub use routes::create_routes;
pub use state::AppState;
