//! # Repository Layer
//!
//! Thin wrappers around SeaORM queries, one per table. Each repository borrows any
//! [`sea_orm::ConnectionTrait`] so the same calls run against the pool or inside a
//! transaction.
//!
//! State-changing writes go through `update_versioned`, which only applies when the row
//! still carries the version the caller read. A `None` result means another writer got
//! there first.

pub mod analysis_job;
pub mod asset;
pub mod automation_rule;
pub mod campaign;
pub mod connection;
pub mod domain_event;
pub mod pending_oauth_request;
pub mod project;

pub use analysis_job::AnalysisJobRepository;
pub use asset::AssetRepository;
pub use automation_rule::AutomationRuleRepository;
pub use campaign::CampaignRepository;
pub use connection::ConnectionRepository;
pub use domain_event::{DomainEventRepository, EventFilter};
pub use pending_oauth_request::PendingOAuthRequestRepository;
pub use project::ProjectRepository;
