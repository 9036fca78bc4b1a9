//! # Data Models
//!
//! SeaORM entities and the closed enums persisted with them.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod analysis_job;
pub mod asset;
pub mod automation_rule;
pub mod campaign;
pub mod connection;
pub mod domain_event;
pub mod pending_oauth_request;
pub mod platform;
pub mod project;

pub use analysis_job::Entity as AnalysisJob;
pub use asset::Entity as Asset;
pub use automation_rule::Entity as AutomationRule;
pub use campaign::Entity as Campaign;
pub use connection::Entity as Connection;
pub use domain_event::Entity as DomainEvent;
pub use pending_oauth_request::Entity as PendingOAuthRequest;
pub use platform::Platform;
pub use project::Entity as Project;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "launchgate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
