//! Asset repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::models::asset::{self, Entity as Asset};

pub struct AssetRepository<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> AssetRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<asset::Model>, DbErr> {
        Asset::find_by_id(id).one(self.conn).await
    }

    pub async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<asset::Model>, DbErr> {
        Asset::find()
            .filter(asset::Column::ProjectId.eq(project_id))
            .order_by_asc(asset::Column::CreatedAt)
            .order_by_asc(asset::Column::Id)
            .all(self.conn)
            .await
    }

    pub async fn insert(&self, model: asset::Model) -> Result<asset::Model, DbErr> {
        let id = model.id;
        Asset::insert(model.into_active_model().reset_all())
            .exec_without_returning(self.conn)
            .await?;
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("asset {id} not persisted")))
    }

    /// Optimistic write; see the module docs on [`crate::repositories`]
    pub async fn update_versioned(
        &self,
        expected_version: i32,
        mut updated: asset::Model,
    ) -> Result<Option<asset::Model>, DbErr> {
        updated.version = expected_version + 1;
        updated.updated_at = Utc::now();
        let id = updated.id;

        let result = Asset::update_many()
            .set(updated.clone().into_active_model().reset_all())
            .filter(asset::Column::Id.eq(id))
            .filter(asset::Column::Version.eq(expected_version))
            .exec(self.conn)
            .await?;

        Ok((result.rows_affected == 1).then_some(updated))
    }

    pub async fn delete_for_project(&self, project_id: Uuid) -> Result<u64, DbErr> {
        let result = Asset::delete_many()
            .filter(asset::Column::ProjectId.eq(project_id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
