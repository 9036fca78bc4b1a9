//! Project repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::models::project::{self, Entity as Project, ProjectStage};

pub struct ProjectRepository<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> ProjectRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<project::Model>, DbErr> {
        Project::find_by_id(id).one(self.conn).await
    }

    pub async fn list_for_owner(&self, owner_user_id: Uuid) -> Result<Vec<project::Model>, DbErr> {
        Project::find()
            .filter(project::Column::OwnerUserId.eq(owner_user_id))
            .order_by_asc(project::Column::CreatedAt)
            .all(self.conn)
            .await
    }

    pub async fn insert(&self, model: project::Model) -> Result<project::Model, DbErr> {
        let id = model.id;
        Project::insert(model.into_active_model().reset_all())
            .exec_without_returning(self.conn)
            .await?;
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("project {id} not persisted")))
    }

    pub async fn set_stage(&self, id: Uuid, stage: ProjectStage) -> Result<(), DbErr> {
        Project::update_many()
            .set(project::ActiveModel {
                stage: Set(stage),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(project::Column::Id.eq(id))
            .exec(self.conn)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, DbErr> {
        let result = Project::delete_by_id(id).exec(self.conn).await?;
        Ok(result.rows_affected == 1)
    }
}
