//! Pending OAuth request repository

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel, QueryFilter,
};
use uuid::Uuid;

use crate::models::pending_oauth_request::{self, Entity as PendingOAuthRequest};

pub struct PendingOAuthRequestRepository<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> PendingOAuthRequestRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn insert(
        &self,
        model: pending_oauth_request::Model,
    ) -> Result<pending_oauth_request::Model, DbErr> {
        let id = model.id;
        PendingOAuthRequest::insert(model.into_active_model().reset_all())
            .exec_without_returning(self.conn)
            .await?;
        PendingOAuthRequest::find_by_id(id)
            .one(self.conn)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("pending request {id} not persisted")))
    }

    pub async fn find_by_state(
        &self,
        state: &str,
    ) -> Result<Option<pending_oauth_request::Model>, DbErr> {
        PendingOAuthRequest::find()
            .filter(pending_oauth_request::Column::State.eq(state))
            .one(self.conn)
            .await
    }

    /// Deletes the request; `true` only for the caller whose delete removed the row.
    pub async fn claim(&self, id: Uuid) -> Result<bool, DbErr> {
        let result = PendingOAuthRequest::delete_many()
            .filter(pending_oauth_request::Column::Id.eq(id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<pending_oauth_request::Model>, DbErr> {
        let all = PendingOAuthRequest::find().all(self.conn).await?;
        Ok(all.into_iter().filter(|r| r.is_expired_at(now)).collect())
    }

    pub async fn delete_for_project(&self, project_id: Uuid) -> Result<u64, DbErr> {
        let result = PendingOAuthRequest::delete_many()
            .filter(pending_oauth_request::Column::ProjectId.eq(project_id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
