//! Automation rule repository

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::models::automation_rule::{self, Entity as AutomationRule, RuleState};

pub struct AutomationRuleRepository<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> AutomationRuleRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<automation_rule::Model>, DbErr> {
        AutomationRule::find_by_id(id).one(self.conn).await
    }

    pub async fn list_for_project(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<automation_rule::Model>, DbErr> {
        AutomationRule::find()
            .filter(automation_rule::Column::ProjectId.eq(project_id))
            .order_by_asc(automation_rule::Column::CreatedAt)
            .order_by_asc(automation_rule::Column::Id)
            .all(self.conn)
            .await
    }

    pub async fn list_in_cooldown(&self) -> Result<Vec<automation_rule::Model>, DbErr> {
        AutomationRule::find()
            .filter(automation_rule::Column::State.eq(RuleState::Cooldown))
            .all(self.conn)
            .await
    }

    pub async fn insert(
        &self,
        model: automation_rule::Model,
    ) -> Result<automation_rule::Model, DbErr> {
        let id = model.id;
        AutomationRule::insert(model.into_active_model().reset_all())
            .exec_without_returning(self.conn)
            .await?;
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("automation rule {id} not persisted")))
    }

    pub async fn update_versioned(
        &self,
        expected_version: i32,
        mut updated: automation_rule::Model,
    ) -> Result<Option<automation_rule::Model>, DbErr> {
        updated.version = expected_version + 1;
        updated.updated_at = Utc::now();
        let id = updated.id;

        let result = AutomationRule::update_many()
            .set(updated.clone().into_active_model().reset_all())
            .filter(automation_rule::Column::Id.eq(id))
            .filter(automation_rule::Column::Version.eq(expected_version))
            .exec(self.conn)
            .await?;

        Ok((result.rows_affected == 1).then_some(updated))
    }

    /// Deletes the rule only if it is still at `expected_version`
    pub async fn delete_versioned(&self, id: Uuid, expected_version: i32) -> Result<bool, DbErr> {
        let result = AutomationRule::delete_many()
            .filter(automation_rule::Column::Id.eq(id))
            .filter(automation_rule::Column::Version.eq(expected_version))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn delete_for_project(&self, project_id: Uuid) -> Result<u64, DbErr> {
        let result = AutomationRule::delete_many()
            .filter(automation_rule::Column::ProjectId.eq(project_id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
