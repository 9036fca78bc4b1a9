//! Pending OAuth request entity
//!
//! Short-lived CSRF record correlating an authorization redirect with its callback.

use sea_orm::entity::prelude::*;

use super::platform::Platform;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "pending_oauth_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Opaque state token echoed back by the provider
    pub state: String,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub platform: Platform,
    /// Pending connection reserved at initiation
    pub connection_id: Uuid,
    /// Optional post-auth path on the frontend
    pub redirect_hint: Option<String>,
    pub created_at: DateTimeUtc,
    pub expires_at: DateTimeUtc,
}

impl Model {
    pub fn is_expired_at(&self, now: DateTimeUtc) -> bool {
        self.expires_at <= now
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
