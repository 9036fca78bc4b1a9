//! # Domain events
//!
//! Every attempted state transition, accepted or rejected, is appended to the
//! `domain_events` table. The log is the audit trail and the only channel through which
//! other components observe state changes.
//!
//! Events are written on the same connection (usually the same transaction) as the
//! mutation they describe, so an accepted transition and its event commit together.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DbErr};
use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::domain_event::{self, EntityKind, EventSource};
use crate::repositories::DomainEventRepository;

static LAST_SEQUENCE: AtomicI64 = AtomicI64::new(0);

/// Next ordering key: strictly increasing within the process and seeded from the clock
/// so keys keep increasing across restarts.
pub fn next_sequence() -> i64 {
    let now = Utc::now().timestamp_micros();
    let mut current = LAST_SEQUENCE.load(Ordering::Relaxed);
    loop {
        let next = (current + 1).max(now);
        match LAST_SEQUENCE.compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(observed) => current = observed,
        }
    }
}

/// Builder for a domain event
#[derive(Debug, Clone)]
pub struct NewEvent {
    entity_type: EntityKind,
    entity_id: Uuid,
    action: String,
    source: EventSource,
    project_id: Option<Uuid>,
    previous_state: Option<String>,
    new_state: Option<String>,
    reason: Option<String>,
    outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Applied,
    Rejected,
    GuardBlocked,
}

impl NewEvent {
    pub fn new(
        entity_type: EntityKind,
        entity_id: Uuid,
        action: impl Into<String>,
        source: EventSource,
    ) -> Self {
        Self {
            entity_type,
            entity_id,
            action: action.into(),
            source,
            project_id: None,
            previous_state: None,
            new_state: None,
            reason: None,
            outcome: Outcome::Applied,
        }
    }

    pub fn project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// An accepted transition from `previous` to `new`
    pub fn transition(mut self, previous: Option<&str>, new: &str) -> Self {
        self.previous_state = previous.map(str::to_string);
        self.new_state = Some(new.to_string());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// The transition table refused the action in `current`
    pub fn rejected(mut self, current: &str, reason: impl Into<String>) -> Self {
        self.previous_state = Some(current.to_string());
        self.new_state = None;
        self.reason = Some(reason.into());
        self.outcome = Outcome::Rejected;
        self
    }

    /// A guard refused an otherwise legal transition
    pub fn guard_blocked(mut self, current: &str, reason: impl Into<String>) -> Self {
        self.previous_state = Some(current.to_string());
        self.new_state = None;
        self.reason = Some(reason.into());
        self.outcome = Outcome::GuardBlocked;
        self
    }

    /// `<entity>.<outcome>`, e.g. `asset.transitioned` or `automation_rule.guard_blocked`
    fn event_type(&self) -> String {
        let entity = match self.entity_type {
            EntityKind::Connection => "connection",
            EntityKind::Asset => "asset",
            EntityKind::AutomationRule => "automation_rule",
            EntityKind::Project => "project",
            EntityKind::Campaign => "campaign",
        };
        let outcome = match self.outcome {
            Outcome::Applied => match self.new_state.as_deref() {
                Some(state) => state.to_ascii_lowercase(),
                None => self.action.clone(),
            },
            Outcome::Rejected => "transition_rejected".to_string(),
            Outcome::GuardBlocked => "guard_blocked".to_string(),
        };
        format!("{entity}.{outcome}")
    }

    fn into_model(self, now: DateTime<Utc>) -> domain_event::Model {
        domain_event::Model {
            id: Uuid::new_v4(),
            event_type: self.event_type(),
            source: self.source,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            project_id: self.project_id,
            previous_state: self.previous_state,
            new_state: self.new_state,
            action: self.action,
            reason: self.reason,
            blocked: self.outcome != Outcome::Applied,
            sequence: next_sequence(),
            created_at: now,
        }
    }
}

/// Appends `event` on `conn`
pub async fn record<C: ConnectionTrait>(
    conn: &C,
    event: NewEvent,
) -> Result<domain_event::Model, DbErr> {
    let model = event.into_model(Utc::now());
    debug!(
        event_type = %model.event_type,
        entity_id = %model.entity_id,
        blocked = model.blocked,
        "Recording domain event"
    );
    DomainEventRepository::new(conn).append(model).await
}

/// Event as exposed by the API
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DomainEventResponse {
    pub id: Uuid,
    pub event_type: String,
    pub source: EventSource,
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub project_id: Option<Uuid>,
    pub previous_state: Option<String>,
    pub new_state: Option<String>,
    pub action: String,
    pub reason: Option<String>,
    pub blocked: bool,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

impl From<domain_event::Model> for DomainEventResponse {
    fn from(model: domain_event::Model) -> Self {
        Self {
            id: model.id,
            event_type: model.event_type,
            source: model.source,
            entity_type: model.entity_type,
            entity_id: model.entity_id,
            project_id: model.project_id,
            previous_state: model.previous_state,
            new_state: model.new_state,
            action: model.action,
            reason: model.reason,
            blocked: model.blocked,
            sequence: model.sequence,
            created_at: model.created_at,
        }
    }
}
