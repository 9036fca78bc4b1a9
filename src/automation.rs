//! # Automation rules
//!
//! ```text
//! DISABLED ──enable──▶ ACTIVE ──trigger──▶ COOLDOWN
//!    ▲  ▲                │ │                 │ │
//!    │  └────disable─────┘ └─fail─▶ ERROR    │ └─reset / expiry─▶ ACTIVE
//!    │                               │       │
//!    └──────────disable──────────────┴───────┘
//! ```
//!
//! Delete is only permitted from `DISABLED` or `ERROR`. Entering `COOLDOWN` stamps
//! `last_triggered_at` and `cooldown_ends_at`; the [`CooldownResumer`] returns expired
//! cooldowns to `ACTIVE`, a manual reset does so immediately.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Deserialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::CoreError;
use crate::events::{self, NewEvent};
use crate::models::automation_rule::{
    self, RuleAction, RuleCondition, RuleScope, RuleState,
};
use crate::models::domain_event::{EntityKind, EventSource};
use crate::repositories::AutomationRuleRepository;

/// Longest accepted cooldown: one week
pub const MAX_COOLDOWN_MINUTES: i32 = 7 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCommand {
    Enable,
    Disable,
    Trigger,
    Fail,
    Reset,
    Delete,
}

impl RuleCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCommand::Enable => "enable",
            RuleCommand::Disable => "disable",
            RuleCommand::Trigger => "trigger",
            RuleCommand::Fail => "fail",
            RuleCommand::Reset => "reset",
            RuleCommand::Delete => "delete",
        }
    }
}

pub fn allowed_commands(state: RuleState) -> &'static [RuleCommand] {
    match state {
        RuleState::Disabled => &[RuleCommand::Enable, RuleCommand::Delete],
        RuleState::Active => &[RuleCommand::Disable, RuleCommand::Trigger, RuleCommand::Fail],
        RuleState::Cooldown => &[RuleCommand::Reset, RuleCommand::Disable],
        RuleState::Error => &[RuleCommand::Disable, RuleCommand::Delete],
    }
}

/// Next state for a caller command; `None` when the table forbids it or the command
/// removes the rule.
pub fn next_state(state: RuleState, command: RuleCommand) -> Option<RuleState> {
    if !allowed_commands(state).contains(&command) {
        return None;
    }
    match command {
        RuleCommand::Enable | RuleCommand::Reset => Some(RuleState::Active),
        RuleCommand::Disable => Some(RuleState::Disabled),
        RuleCommand::Trigger => Some(RuleState::Cooldown),
        RuleCommand::Fail => Some(RuleState::Error),
        RuleCommand::Delete => None,
    }
}

/// Whether a rule's cooldown has run out at `now`
pub fn cooldown_expired(rule: &automation_rule::Model, now: DateTime<Utc>) -> bool {
    rule.state == RuleState::Cooldown && rule.cooldown_ends_at.is_none_or(|ends| ends <= now)
}

fn allowed_names(state: RuleState) -> Vec<String> {
    allowed_commands(state)
        .iter()
        .map(|command| command.as_str().to_string())
        .collect()
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewRule {
    pub name: String,
    pub scope: RuleScope,
    pub condition: RuleCondition,
    pub action: RuleAction,
    #[serde(default)]
    pub cooldown_minutes: i32,
}

#[derive(Clone)]
pub struct AutomationService {
    db: Arc<DatabaseConnection>,
}

impl AutomationService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get(&self, rule_id: Uuid) -> Result<automation_rule::Model, CoreError> {
        AutomationRuleRepository::new(self.db.as_ref())
            .find_by_id(rule_id)
            .await?
            .ok_or_else(|| CoreError::not_found("automation_rule", rule_id))
    }

    pub async fn list_for_project(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<automation_rule::Model>, CoreError> {
        Ok(AutomationRuleRepository::new(self.db.as_ref())
            .list_for_project(project_id)
            .await?)
    }

    /// Creates a rule in `DISABLED`
    #[instrument(skip(self, input), fields(project_id = %project_id))]
    pub async fn create(
        &self,
        project_id: Uuid,
        input: NewRule,
        source: EventSource,
    ) -> Result<automation_rule::Model, CoreError> {
        if input.name.trim().is_empty() {
            return Err(CoreError::Validation("rule name must not be empty".to_string()));
        }
        if input.condition.metric.trim().is_empty() {
            return Err(CoreError::Validation(
                "rule condition needs a metric".to_string(),
            ));
        }
        if !input.condition.threshold.is_finite() {
            return Err(CoreError::Validation(
                "rule threshold must be a finite number".to_string(),
            ));
        }
        if !(0..=MAX_COOLDOWN_MINUTES).contains(&input.cooldown_minutes) {
            return Err(CoreError::Validation(format!(
                "cooldown_minutes must be between 0 and {MAX_COOLDOWN_MINUTES}"
            )));
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;
        let stored = AutomationRuleRepository::new(&txn)
            .insert(automation_rule::Model {
                id: Uuid::new_v4(),
                project_id,
                name: input.name.trim().to_string(),
                scope: input.scope,
                condition: input.condition,
                action: input.action,
                state: RuleState::Disabled,
                cooldown_minutes: input.cooldown_minutes,
                last_triggered_at: None,
                cooldown_ends_at: None,
                last_error: None,
                version: 0,
                created_at: now,
                updated_at: now,
            })
            .await?;
        events::record(
            &txn,
            NewEvent::new(EntityKind::AutomationRule, stored.id, "create", source)
                .project(project_id)
                .transition(None, RuleState::Disabled.as_str()),
        )
        .await?;
        txn.commit().await?;

        Ok(stored)
    }

    async fn reject(
        &self,
        rule: &automation_rule::Model,
        command: RuleCommand,
        source: EventSource,
    ) -> Result<CoreError, CoreError> {
        let current = rule.state.as_str();
        events::record(
            self.db.as_ref(),
            NewEvent::new(EntityKind::AutomationRule, rule.id, command.as_str(), source)
                .project(rule.project_id)
                .rejected(
                    current,
                    format!(
                        "action '{}' is not allowed in state {}",
                        command.as_str(),
                        current
                    ),
                ),
        )
        .await?;

        Ok(CoreError::InvalidTransition {
            entity: "automation_rule",
            current_state: current.to_string(),
            attempted_action: command.as_str().to_string(),
            allowed_actions: allowed_names(rule.state),
        })
    }

    /// Writes `rule → target` with its event, failing on a lost version race
    async fn write(
        &self,
        rule: &automation_rule::Model,
        target: RuleState,
        action: &str,
        source: EventSource,
        reason: Option<String>,
        update: impl FnOnce(&mut automation_rule::Model),
    ) -> Result<automation_rule::Model, CoreError> {
        let mut updated = rule.clone();
        updated.state = target;
        update(&mut updated);

        let mut event = NewEvent::new(EntityKind::AutomationRule, rule.id, action, source)
            .project(rule.project_id)
            .transition(Some(rule.state.as_str()), target.as_str());
        if let Some(reason) = reason {
            event = event.reason(reason);
        }

        let txn = self.db.begin().await?;
        let stored = AutomationRuleRepository::new(&txn)
            .update_versioned(rule.version, updated)
            .await?
            .ok_or(CoreError::Conflict {
                entity: "automation_rule",
                id: rule.id,
            })?;
        events::record(&txn, event).await?;
        txn.commit().await?;

        debug!(
            rule_id = %rule.id,
            from = rule.state.as_str(),
            to = target.as_str(),
            "Automation rule transitioned"
        );
        Ok(stored)
    }

    async fn command(
        &self,
        rule_id: Uuid,
        command: RuleCommand,
        source: EventSource,
        reason: Option<String>,
        update: impl FnOnce(&mut automation_rule::Model),
    ) -> Result<automation_rule::Model, CoreError> {
        let rule = self.get(rule_id).await?;
        let Some(target) = next_state(rule.state, command) else {
            return Err(self.reject(&rule, command, source).await?);
        };
        self.write(&rule, target, command.as_str(), source, reason, update)
            .await
    }

    /// `DISABLED → ACTIVE`
    pub async fn enable(
        &self,
        rule_id: Uuid,
        source: EventSource,
    ) -> Result<automation_rule::Model, CoreError> {
        self.command(rule_id, RuleCommand::Enable, source, None, |rule| {
            rule.last_error = None;
        })
        .await
    }

    /// `ACTIVE | COOLDOWN | ERROR → DISABLED`
    pub async fn disable(
        &self,
        rule_id: Uuid,
        source: EventSource,
    ) -> Result<automation_rule::Model, CoreError> {
        self.command(rule_id, RuleCommand::Disable, source, None, |rule| {
            rule.cooldown_ends_at = None;
        })
        .await
    }

    /// `ACTIVE → COOLDOWN`, stamping the trigger time and cooldown end
    pub async fn trigger(
        &self,
        rule_id: Uuid,
        source: EventSource,
    ) -> Result<automation_rule::Model, CoreError> {
        let now = Utc::now();
        self.command(rule_id, RuleCommand::Trigger, source, None, |rule| {
            rule.last_triggered_at = Some(now);
            rule.cooldown_ends_at =
                Some(now + chrono::Duration::minutes(i64::from(rule.cooldown_minutes)));
        })
        .await
    }

    /// `ACTIVE → ERROR`, keeping the failure message
    pub async fn record_failure(
        &self,
        rule_id: Uuid,
        message: String,
        source: EventSource,
    ) -> Result<automation_rule::Model, CoreError> {
        let reason = message.clone();
        self.command(rule_id, RuleCommand::Fail, source, Some(reason), |rule| {
            rule.last_error = Some(message);
        })
        .await
    }

    /// Manual `COOLDOWN → ACTIVE`, bypassing the timer
    pub async fn reset(
        &self,
        rule_id: Uuid,
        source: EventSource,
    ) -> Result<automation_rule::Model, CoreError> {
        self.command(rule_id, RuleCommand::Reset, source, None, |rule| {
            rule.cooldown_ends_at = None;
        })
        .await
    }

    /// Deletes a `DISABLED` or `ERROR` rule
    #[instrument(skip(self), fields(rule_id = %rule_id))]
    pub async fn delete(&self, rule_id: Uuid, source: EventSource) -> Result<(), CoreError> {
        let rule = self.get(rule_id).await?;
        if !allowed_commands(rule.state).contains(&RuleCommand::Delete) {
            return Err(self.reject(&rule, RuleCommand::Delete, source).await?);
        }

        let txn = self.db.begin().await?;
        if !AutomationRuleRepository::new(&txn)
            .delete_versioned(rule.id, rule.version)
            .await?
        {
            return Err(CoreError::Conflict {
                entity: "automation_rule",
                id: rule.id,
            });
        }
        events::record(
            &txn,
            NewEvent::new(
                EntityKind::AutomationRule,
                rule.id,
                RuleCommand::Delete.as_str(),
                source,
            )
            .project(rule.project_id)
            .transition(Some(rule.state.as_str()), "DELETED"),
        )
        .await?;
        txn.commit().await?;

        info!(rule_id = %rule.id, "Automation rule deleted");
        Ok(())
    }

    /// Triggers an `ACTIVE` rule whose condition holds for `metric_value`.
    ///
    /// Returns the updated rule when it fired, `None` when it was not eligible.
    pub async fn evaluate(
        &self,
        rule_id: Uuid,
        metric_value: f64,
    ) -> Result<Option<automation_rule::Model>, CoreError> {
        let rule = self.get(rule_id).await?;
        if rule.state != RuleState::Active || !rule.condition.evaluate(metric_value) {
            return Ok(None);
        }
        self.trigger(rule_id, EventSource::Automation).await.map(Some)
    }

    /// Returns every rule whose cooldown has run out to `ACTIVE`
    pub async fn resume_expired_cooldowns(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, CoreError> {
        let in_cooldown = AutomationRuleRepository::new(self.db.as_ref())
            .list_in_cooldown()
            .await?;

        let mut resumed = Vec::new();
        for rule in in_cooldown.into_iter().filter(|r| cooldown_expired(r, now)) {
            match self
                .write(
                    &rule,
                    RuleState::Active,
                    "cooldown_expired",
                    EventSource::System,
                    None,
                    |r| r.cooldown_ends_at = None,
                )
                .await
            {
                Ok(_) => resumed.push(rule.id),
                // Reset or disabled concurrently; the next tick sees the new state
                Err(CoreError::Conflict { .. }) => continue,
                Err(other) => return Err(other),
            }
        }

        if !resumed.is_empty() {
            counter!("rule_cooldowns_resumed_total").increment(resumed.len() as u64);
        }
        Ok(resumed)
    }
}

/// Background loop returning expired cooldowns to `ACTIVE`
pub struct CooldownResumer {
    service: AutomationService,
    tick_seconds: u64,
}

impl CooldownResumer {
    pub fn new(service: AutomationService, tick_seconds: u64) -> Self {
        Self {
            service,
            tick_seconds,
        }
    }

    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Starting cooldown resumer");
        let tick_interval = Duration::from_secs(self.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Cooldown resumer shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    match self.service.resume_expired_cooldowns(Utc::now()).await {
                        Ok(resumed) if !resumed.is_empty() => {
                            info!(resumed = resumed.len(), "Resumed rules after cooldown");
                        }
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "Cooldown resume tick failed"),
                    }
                }
            }
        }

        info!("Cooldown resumer stopped");
    }
}
