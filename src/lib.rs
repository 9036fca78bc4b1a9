//! # Launchgate
//!
//! Ad platform connections, creative asset readiness and launch automation. The
//! library exposes the services behind the HTTP API so they can be driven directly
//! from tests and tooling.

pub mod adapters;
pub mod analysis_worker;
pub mod asset_state;
pub mod auth;
pub mod automation;
pub mod config;
pub mod connection_manager;
pub mod crypto;
pub mod db;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod project_stage;
pub mod projects;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod token_refresh;
pub use migration;
