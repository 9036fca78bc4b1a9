//! Connection entity model
//!
//! One row per authorized external ad account. Credential material lives only in
//! `credentials_ciphertext`, sealed by the token vault.

use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::platform::Platform;

/// Connection lifecycle status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "connected")]
    Connected,
    #[sea_orm(string_value = "limited_access")]
    LimitedAccess,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "revoked")]
    Revoked,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::LimitedAccess => "limited_access",
            ConnectionStatus::Expired => "expired",
            ConnectionStatus::Revoked => "revoked",
        }
    }

    /// Whether the encrypted credential blob must be present in this status
    pub fn holds_credentials(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connected | ConnectionStatus::LimitedAccess | ConnectionStatus::Expired
        )
    }

    /// Whether the connection currently grants API access
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connected | ConnectionStatus::LimitedAccess
        )
    }
}

/// Account-level capability derived from granted scopes
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Launch,
}

/// Ordered, de-duplicated permission list stored as JSON
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema,
)]
pub struct PermissionSet(pub Vec<Permission>);

impl PermissionSet {
    pub fn new(permissions: impl IntoIterator<Item = Permission>) -> Self {
        let mut values: Vec<Permission> = permissions.into_iter().collect();
        values.sort();
        values.dedup();
        Self(values)
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn can_launch(&self) -> bool {
        self.contains(Permission::Launch)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// User who authorized the account
    pub user_id: Uuid,

    pub project_id: Uuid,

    pub platform: Platform,

    /// Provider-side ad account id; absent while the connection is pending
    pub external_account_id: Option<String>,

    pub display_name: Option<String>,

    pub status: ConnectionStatus,

    #[sea_orm(column_type = "JsonBinary")]
    pub permissions: PermissionSet,

    /// Vault-sealed token set; present iff the status holds credentials
    pub credentials_ciphertext: Option<Vec<u8>>,

    pub token_expires_at: Option<DateTimeUtc>,

    pub last_refreshed_at: Option<DateTimeUtc>,

    /// Optimistic concurrency counter, bumped on every state-changing write
    pub version: i32,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id",
        on_delete = "Cascade"
    )]
    Project,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
