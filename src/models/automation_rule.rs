//! Automation rule entity model
//!
//! A condition -> action policy scoped to a campaign, ad set or ad. Lifecycle lives in
//! [`crate::automation`].

use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleState {
    #[sea_orm(string_value = "DISABLED")]
    Disabled,
    #[sea_orm(string_value = "ACTIVE")]
    Active,
    #[sea_orm(string_value = "COOLDOWN")]
    Cooldown,
    #[sea_orm(string_value = "ERROR")]
    Error,
}

impl RuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleState::Disabled => "DISABLED",
            RuleState::Active => "ACTIVE",
            RuleState::Cooldown => "COOLDOWN",
            RuleState::Error => "ERROR",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleScope {
    #[sea_orm(string_value = "CAMPAIGN")]
    Campaign,
    #[sea_orm(string_value = "ADSET")]
    Adset,
    #[sea_orm(string_value = "AD")]
    Ad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl Comparator {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Gte => value >= threshold,
            Comparator::Lt => value < threshold,
            Comparator::Lte => value <= threshold,
            Comparator::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

/// Metric predicate, e.g. `cpa gt 25.0`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromJsonQueryResult, ToSchema)]
pub struct RuleCondition {
    pub metric: String,
    pub comparator: Comparator,
    pub threshold: f64,
}

impl RuleCondition {
    pub fn evaluate(&self, metric_value: f64) -> bool {
        self.comparator.holds(metric_value, self.threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleActionType {
    Pause,
    Resume,
    AdjustBudget,
    Notify,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromJsonQueryResult, ToSchema)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub action_type: RuleActionType,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "automation_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub scope: RuleScope,
    #[sea_orm(column_type = "JsonBinary")]
    pub condition: RuleCondition,
    #[sea_orm(column_type = "JsonBinary")]
    pub action: RuleAction,
    pub state: RuleState,
    pub cooldown_minutes: i32,
    pub last_triggered_at: Option<DateTimeUtc>,
    pub cooldown_ends_at: Option<DateTimeUtc>,
    pub last_error: Option<String>,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparators_evaluate_against_threshold() {
        let condition = RuleCondition {
            metric: "cpa".to_string(),
            comparator: Comparator::Gt,
            threshold: 25.0,
        };
        assert!(condition.evaluate(30.0));
        assert!(!condition.evaluate(25.0));

        assert!(Comparator::Gte.holds(25.0, 25.0));
        assert!(Comparator::Lt.holds(1.0, 2.0));
        assert!(Comparator::Lte.holds(2.0, 2.0));
        assert!(Comparator::Eq.holds(0.5, 0.5));
    }

    #[test]
    fn action_deserializes_with_default_params() {
        let action: RuleAction = serde_json::from_str(r#"{"type":"pause"}"#).unwrap();
        assert_eq!(action.action_type, RuleActionType::Pause);
        assert!(action.params.is_null());
    }
}
