//! Analysis job repository

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder,
    QuerySelect,
};
use uuid::Uuid;

use crate::models::analysis_job::{self, AnalysisJobStatus, Entity as AnalysisJob};

pub struct AnalysisJobRepository<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> AnalysisJobRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<analysis_job::Model>, DbErr> {
        AnalysisJob::find_by_id(id).one(self.conn).await
    }

    pub async fn insert(&self, model: analysis_job::Model) -> Result<analysis_job::Model, DbErr> {
        let id = model.id;
        AnalysisJob::insert(model.into_active_model().reset_all())
            .exec_without_returning(self.conn)
            .await?;
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("analysis job {id} not persisted")))
    }

    /// The queued or running job for an asset, if one exists
    pub async fn find_open_for_asset(
        &self,
        asset_id: Uuid,
    ) -> Result<Option<analysis_job::Model>, DbErr> {
        AnalysisJob::find()
            .filter(analysis_job::Column::AssetId.eq(asset_id))
            .filter(
                analysis_job::Column::Status
                    .is_in([AnalysisJobStatus::Queued, AnalysisJobStatus::Running]),
            )
            .order_by_desc(analysis_job::Column::CreatedAt)
            .one(self.conn)
            .await
    }

    /// Queued jobs whose next attempt is due, oldest first, at most `limit`
    pub async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<analysis_job::Model>, DbErr> {
        AnalysisJob::find()
            .filter(analysis_job::Column::Status.eq(AnalysisJobStatus::Queued))
            .filter(analysis_job::Column::NextAttemptAt.lte(now))
            .order_by_asc(analysis_job::Column::NextAttemptAt)
            .limit(limit)
            .all(self.conn)
            .await
    }

    /// Running jobs claimed at or before `cutoff`, oldest claim first
    pub async fn list_expired_leases(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<analysis_job::Model>, DbErr> {
        AnalysisJob::find()
            .filter(analysis_job::Column::Status.eq(AnalysisJobStatus::Running))
            .filter(analysis_job::Column::ClaimedAt.lte(cutoff))
            .order_by_asc(analysis_job::Column::ClaimedAt)
            .limit(limit)
            .all(self.conn)
            .await
    }

    /// Moves a job from `expected` status to `updated.status`.
    ///
    /// Jobs carry no version column; status plus attempt count serve as the check.
    pub async fn transition(
        &self,
        expected: &analysis_job::Model,
        mut updated: analysis_job::Model,
    ) -> Result<Option<analysis_job::Model>, DbErr> {
        updated.updated_at = Utc::now();
        let result = AnalysisJob::update_many()
            .set(updated.clone().into_active_model().reset_all())
            .filter(analysis_job::Column::Id.eq(expected.id))
            .filter(analysis_job::Column::Status.eq(expected.status))
            .filter(analysis_job::Column::Attempts.eq(expected.attempts))
            .exec(self.conn)
            .await?;
        Ok((result.rows_affected == 1).then_some(updated))
    }

    pub async fn delete_for_asset(&self, asset_id: Uuid) -> Result<u64, DbErr> {
        let result = AnalysisJob::delete_many()
            .filter(analysis_job::Column::AssetId.eq(asset_id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
