//! Campaign repository

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::models::campaign::{self, Entity as Campaign};

pub struct CampaignRepository<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> CampaignRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn insert(&self, model: campaign::Model) -> Result<campaign::Model, DbErr> {
        let id = model.id;
        Campaign::insert(model.into_active_model().reset_all())
            .exec_without_returning(self.conn)
            .await?;
        Campaign::find_by_id(id)
            .one(self.conn)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("campaign {id} not persisted")))
    }

    pub async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<campaign::Model>, DbErr> {
        Campaign::find()
            .filter(campaign::Column::ProjectId.eq(project_id))
            .order_by_asc(campaign::Column::CreatedAt)
            .all(self.conn)
            .await
    }

    pub async fn count_for_project(&self, project_id: Uuid) -> Result<u64, DbErr> {
        Campaign::find()
            .filter(campaign::Column::ProjectId.eq(project_id))
            .count(self.conn)
            .await
    }

    pub async fn delete_for_project(&self, project_id: Uuid) -> Result<u64, DbErr> {
        let result = Campaign::delete_many()
            .filter(campaign::Column::ProjectId.eq(project_id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
