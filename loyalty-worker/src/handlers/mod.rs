use std::sync::Arc;

use loyalty_common::eventqueue::{ChangeEvent, EntityKind};
use loyalty_common::records::PROCESSED_EVENTS;
use loyalty_common::store::{DocumentStore, FieldSet, StoreError};

use crate::error::HandlerError;
use crate::milestones::MilestoneTable;

pub mod onboarding;
pub mod visits;

/// Everything a handler invocation needs besides the event itself.
/// Invocations are stateless: all shared mutable state lives in the store.
#[derive(Clone)]
pub struct HandlerContext {
    pub store: Arc<dyn DocumentStore>,
    pub milestones: MilestoneTable,
    pub dedup_events: bool,
}

/// The terminal outcome of a handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The event's effects were applied to the aggregates.
    Applied,
    /// An earlier delivery of this event already applied it; nothing done.
    Duplicate,
    /// The visit referenced a customer that does not exist; nothing done.
    CustomerMissing,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Duplicate => "duplicate",
            Outcome::CustomerMissing => "customer_missing",
        }
    }
}

/// Dispatch a change event to the handler for its entity kind.
pub async fn process_event(
    context: &HandlerContext,
    event: &ChangeEvent,
) -> Result<Outcome, HandlerError> {
    match event.entity_kind {
        EntityKind::Customer => onboarding::on_customer_created(context, event).await,
        EntityKind::Visit => visits::on_visit_recorded(context, event).await,
    }
}

/// Conditionally record the event's dedup marker, returning false when the
/// marker already exists, i.e. an earlier delivery applied this event.
///
/// Increments are not naturally idempotent under at-least-once delivery, so
/// this check-and-set must happen before a handler applies any of them. With
/// dedup disabled every delivery reports as first, reproducing the lenient
/// may-double-count accounting of the original pipeline.
pub(crate) async fn mark_event_processed(
    context: &HandlerContext,
    event: &ChangeEvent,
) -> Result<bool, StoreError> {
    if !context.dedup_events {
        return Ok(true);
    }

    context
        .store
        .insert_if_absent(
            PROCESSED_EVENTS,
            &event.dedup_key(),
            FieldSet::new()
                .set("entityKind", event.entity_kind.to_string())
                .server_timestamp("processedAt"),
        )
        .await
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::Utc;
    use loyalty_common::eventqueue::{ChangeEvent, EntityKind, EventStatus};

    /// Build a running ChangeEvent the way the queue would deliver it.
    pub fn change_event(
        entity_kind: EntityKind,
        entity_id: &str,
        payload: serde_json::Value,
    ) -> ChangeEvent {
        ChangeEvent {
            id: 1,
            attempt: 1,
            attempted_by: vec!["test-worker".to_owned()],
            entity_kind,
            entity_id: entity_id.to_owned(),
            payload: sqlx::types::Json(payload),
            status: EventStatus::Running,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }
}
