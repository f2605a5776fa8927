use std::fmt;
use std::str::FromStr;

use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

/// Enumeration of errors for operations with the change event queue.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("connection failed with: {error}")]
    Connection { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    Query { command: String, error: sqlx::Error },
    #[error("{0} is not a valid EntityKind")]
    ParseEntityKind(String),
}

/// The entity collections that emit "document created" events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entity_kind")]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Customer,
    Visit,
}

impl FromStr for EntityKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(EntityKind::Customer),
            "visit" => Ok(EntityKind::Visit),
            invalid => Err(QueueError::ParseEntityKind(invalid.to_owned())),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EntityKind::Customer => write!(f, "customer"),
            EntityKind::Visit => write!(f, "visit"),
        }
    }
}

/// Enumeration of possible statuses for a ChangeEvent.
/// Available: an event waiting in the queue to be picked up by a worker.
/// Completed: an event a worker applied successfully.
/// Failed: an event a worker gave up on; terminal, never retried.
/// Running: an event currently being processed by a worker.
#[derive(Debug, PartialEq, sqlx::Type)]
#[sqlx(type_name = "event_status")]
#[sqlx(rename_all = "lowercase")]
pub enum EventStatus {
    Available,
    Completed,
    Failed,
    Running,
}

/// A "document created" notification as dequeued by a worker.
/// The payload is a snapshot of the record at creation time; handlers never
/// mutate it, only the aggregate documents it points at.
#[derive(Debug, sqlx::FromRow)]
pub struct ChangeEvent {
    pub id: i64,
    pub attempt: i32,
    pub attempted_by: Vec<String>,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub payload: sqlx::types::Json<serde_json::Value>,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    /// The stable identity of this event across redeliveries. Creation
    /// events fire once per entity, so the entity key is the event key.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.entity_kind, self.entity_id)
    }
}

/// A new change event to be enqueued.
pub struct NewChangeEvent {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub payload: serde_json::Value,
}

impl NewChangeEvent {
    pub fn new(entity_kind: EntityKind, entity_id: &str, payload: serde_json::Value) -> Self {
        Self {
            entity_kind,
            entity_id: entity_id.to_owned(),
            payload,
        }
    }
}

/// An at-least-once delivery queue implemented on top of a PostgreSQL table.
///
/// Dequeueing marks the row running under `FOR UPDATE SKIP LOCKED`, so
/// concurrent workers never pick up the same row twice while it runs; an
/// abandoned invocation leaves the row running until an operator or sweeper
/// makes it available again, which is where redelivery comes from.
#[derive(Clone)]
pub struct PgEventQueue {
    table: String,
    pool: PgPool,
}

pub type PgEventQueueResult<T> = std::result::Result<T, QueueError>;

impl PgEventQueue {
    /// Initialize a new PgEventQueue backed by table in PostgreSQL.
    pub async fn new(table: &str, url: &str, max_connections: u32) -> PgEventQueueResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| QueueError::Connection { error })?;

        Ok(Self::new_from_pool(table, pool))
    }

    /// Initialize a new PgEventQueue backed by table in PostgreSQL from an existing pool.
    pub fn new_from_pool(table: &str, pool: PgPool) -> Self {
        Self {
            table: table.to_owned(),
            pool,
        }
    }

    /// Enqueue a NewChangeEvent into this PgEventQueue.
    /// We take ownership of the event to enforce it is only enqueued once.
    pub async fn enqueue(&self, event: NewChangeEvent) -> PgEventQueueResult<()> {
        // TODO: Escaping. I think sqlx doesn't support identifiers.
        let base_query = format!(
            r#"
INSERT INTO {}
    (attempt, attempted_by, created_at, entity_kind, entity_id, payload, status)
VALUES
    (0, '{{}}', NOW(), $1, $2, $3, 'available'::event_status)
            "#,
            &self.table
        );

        _ = sqlx::query(&base_query)
            .bind(event.entity_kind)
            .bind(&event.entity_id)
            .bind(sqlx::types::Json(&event.payload))
            .execute(&self.pool)
            .await
            .map_err(|error| QueueError::Query {
                command: "INSERT".to_owned(),
                error,
            })?;

        Ok(())
    }

    /// Dequeue the next available ChangeEvent from this PgEventQueue, if any.
    pub async fn dequeue(&self, attempted_by: &str) -> PgEventQueueResult<Option<ChangeEvent>> {
        let base_query = format!(
            r#"
WITH available_in_queue AS (
    SELECT
        id
    FROM
        "{0}"
    WHERE
        status = 'available'
    ORDER BY
        id
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
UPDATE
    "{0}"
SET
    started_at = NOW(),
    status = 'running'::event_status,
    attempt = "{0}".attempt + 1,
    attempted_by = array_append("{0}".attempted_by, $1::text)
FROM
    available_in_queue
WHERE
    "{0}".id = available_in_queue.id
RETURNING
    "{0}".*
            "#,
            &self.table
        );

        let event: Option<ChangeEvent> = sqlx::query_as(&base_query)
            .bind(attempted_by)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| QueueError::Query {
                command: "UPDATE".to_owned(),
                error,
            })?;

        Ok(event)
    }

    /// Mark a dequeued ChangeEvent as completed.
    pub async fn complete(&self, event: &ChangeEvent) -> PgEventQueueResult<()> {
        self.finish(event, EventStatus::Completed).await
    }

    /// Mark a dequeued ChangeEvent as failed. Terminal: there is no retry
    /// transition, the delivery layer owns redelivery.
    pub async fn fail(&self, event: &ChangeEvent) -> PgEventQueueResult<()> {
        self.finish(event, EventStatus::Failed).await
    }

    async fn finish(&self, event: &ChangeEvent, status: EventStatus) -> PgEventQueueResult<()> {
        let base_query = format!(
            r#"
UPDATE
    "{0}"
SET
    finished_at = NOW(),
    status = $2
WHERE
    id = $1
            "#,
            &self.table
        );

        _ = sqlx::query(&base_query)
            .bind(event.id)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(|error| QueueError::Query {
                command: "UPDATE".to_owned(),
                error,
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_round_trips_through_strings() {
        assert_eq!(EntityKind::from_str("customer").unwrap(), EntityKind::Customer);
        assert_eq!(EntityKind::from_str("visit").unwrap(), EntityKind::Visit);
        assert_eq!(EntityKind::Customer.to_string(), "customer");
        assert_eq!(EntityKind::Visit.to_string(), "visit");
        assert!(matches!(
            EntityKind::from_str("shop"),
            Err(QueueError::ParseEntityKind(_))
        ));
    }

    #[test]
    fn dedup_key_is_stable_across_redeliveries() {
        let event = ChangeEvent {
            id: 1,
            attempt: 1,
            attempted_by: vec!["worker-a".to_owned()],
            entity_kind: EntityKind::Visit,
            entity_id: "v-42".to_owned(),
            payload: sqlx::types::Json(serde_json::json!({})),
            status: EventStatus::Running,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        let redelivered = ChangeEvent {
            id: 2,
            attempt: 1,
            ..event
        };

        assert_eq!(redelivered.dedup_key(), "visit:v-42");
    }
}
