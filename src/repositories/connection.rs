//! Connection repository for database operations

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::models::Platform;
use crate::models::connection::{self, ConnectionStatus, Entity as Connection};

/// Repository for connection database operations
pub struct ConnectionRepository<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> ConnectionRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<connection::Model>, DbErr> {
        Connection::find_by_id(id).one(self.conn).await
    }

    /// Lists a user's connections, optionally narrowed to one project
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<connection::Model>, DbErr> {
        let mut query = Connection::find().filter(connection::Column::UserId.eq(user_id));
        if let Some(project_id) = project_id {
            query = query.filter(connection::Column::ProjectId.eq(project_id));
        }
        query
            .order_by_asc(connection::Column::CreatedAt)
            .order_by_asc(connection::Column::Id)
            .all(self.conn)
            .await
    }

    pub async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<connection::Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::ProjectId.eq(project_id))
            .order_by_asc(connection::Column::CreatedAt)
            .all(self.conn)
            .await
    }

    /// Finds the non-revoked connection for `(user, platform, external account)`, if any
    pub async fn find_live_for_account(
        &self,
        user_id: Uuid,
        platform: Platform,
        external_account_id: &str,
    ) -> Result<Option<connection::Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::UserId.eq(user_id))
            .filter(connection::Column::Platform.eq(platform))
            .filter(connection::Column::ExternalAccountId.eq(external_account_id))
            .filter(connection::Column::Status.ne(ConnectionStatus::Revoked))
            .filter(connection::Column::Status.ne(ConnectionStatus::Pending))
            .one(self.conn)
            .await
    }

    /// Every credential-holding connection bound to a provider account, across users
    pub async fn list_holding_credentials_for_account(
        &self,
        platform: Platform,
        external_account_id: &str,
    ) -> Result<Vec<connection::Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::Platform.eq(platform))
            .filter(connection::Column::ExternalAccountId.eq(external_account_id))
            .filter(connection::Column::Status.is_in([
                ConnectionStatus::Connected,
                ConnectionStatus::LimitedAccess,
                ConnectionStatus::Expired,
            ]))
            .all(self.conn)
            .await
    }

    /// Live connections whose token expires at or before `cutoff`, soonest first
    pub async fn list_due_for_refresh(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<connection::Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::Status.is_in([
                ConnectionStatus::Connected,
                ConnectionStatus::LimitedAccess,
            ]))
            .filter(connection::Column::CredentialsCiphertext.is_not_null())
            .filter(connection::Column::TokenExpiresAt.lte(cutoff))
            .order_by_asc(connection::Column::TokenExpiresAt)
            .all(self.conn)
            .await
    }

    pub async fn insert(&self, model: connection::Model) -> Result<connection::Model, DbErr> {
        let id = model.id;
        Connection::insert(model.into_active_model().reset_all())
            .exec_without_returning(self.conn)
            .await?;

        // Re-read rather than rely on RETURNING, which SQLite builds may lack
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("connection {id} not persisted")))
    }

    /// Writes `updated` if the stored row is still at `expected_version`.
    ///
    /// Bumps the version and `updated_at`; returns the stored model, or `None` when the
    /// row moved on (or disappeared) since it was read.
    pub async fn update_versioned(
        &self,
        expected_version: i32,
        mut updated: connection::Model,
    ) -> Result<Option<connection::Model>, DbErr> {
        updated.version = expected_version + 1;
        updated.updated_at = Utc::now();
        let id = updated.id;

        let result = Connection::update_many()
            .set(updated.clone().into_active_model().reset_all())
            .filter(connection::Column::Id.eq(id))
            .filter(connection::Column::Version.eq(expected_version))
            .exec(self.conn)
            .await?;

        Ok((result.rows_affected == 1).then_some(updated))
    }

    pub async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<connection::Model>, DbErr> {
        Connection::find()
            .filter(connection::Column::Status.eq(ConnectionStatus::Pending))
            .filter(connection::Column::CreatedAt.lt(cutoff))
            .all(self.conn)
            .await
    }

    /// Removes a connection that never left `pending`
    pub async fn delete_pending(&self, id: Uuid) -> Result<bool, DbErr> {
        let result = Connection::delete_many()
            .filter(connection::Column::Id.eq(id))
            .filter(connection::Column::Status.eq(ConnectionStatus::Pending))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn delete_for_project(&self, project_id: Uuid) -> Result<u64, DbErr> {
        let result = Connection::delete_many()
            .filter(connection::Column::ProjectId.eq(project_id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
