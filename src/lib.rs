// Library interface for the binary and integration tests

pub mod auth;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod db;
pub mod error;
pub mod events;
pub mod exam;
pub mod models;
pub mod object_store;
pub mod queries;
pub mod rooms;
pub mod schema;
pub mod serve;
pub mod session;
pub mod upload;

// Re-export the expected database version for convenience
pub use constants::EXPECTED_DB_VERSION;
