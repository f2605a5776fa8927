use std::sync::Arc;
use std::time;

use loyalty_common::eventqueue::{ChangeEvent, PgEventQueue};
use loyalty_common::health::HealthHandle;
use loyalty_common::store::DocumentStore;
use tokio::sync;
use tracing::error;

use crate::error::WorkerError;
use crate::handlers::{self, HandlerContext};
use crate::milestones::MilestoneTable;

/// A worker to poll the change event queue and spawn a stateless handler
/// invocation per event as they become available.
///
/// Invocations for different events run fully in parallel, including
/// multiple invocations touching the same customer; the only brake is the
/// concurrency semaphore. Nothing orders or serializes them here, the store
/// primitives carry the consistency guarantees.
pub struct LoyaltyWorker<'p> {
    /// An identifier for this worker. Used to mark events we have consumed.
    name: String,
    /// The queue we will be dequeuing events from.
    queue: &'p PgEventQueue,
    /// The shared context handed to every handler invocation.
    context: HandlerContext,
    /// The interval for polling the queue.
    poll_interval: time::Duration,
    /// Maximum number of concurrent events being processed.
    max_concurrent_events: usize,
    /// The liveness check handle, to call on a schedule to report healthy.
    liveness: HealthHandle,
}

impl<'p> LoyaltyWorker<'p> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        queue: &'p PgEventQueue,
        store: Arc<dyn DocumentStore>,
        milestones: MilestoneTable,
        poll_interval: time::Duration,
        max_concurrent_events: usize,
        dedup_events: bool,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            name: name.to_owned(),
            queue,
            context: HandlerContext {
                store,
                milestones,
                dedup_events,
            },
            poll_interval,
            max_concurrent_events,
            liveness,
        }
    }

    /// Wait until an event becomes available in our queue.
    async fn wait_for_event(&self) -> Result<ChangeEvent, WorkerError> {
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            interval.tick().await;
            self.liveness.report_healthy().await;

            if let Some(event) = self.queue.dequeue(&self.name).await? {
                return Ok(event);
            }
        }
    }

    /// Run this worker to continuously process any events that become available.
    pub async fn run(&self) -> Result<(), WorkerError> {
        let semaphore = Arc::new(sync::Semaphore::new(self.max_concurrent_events));
        let report_semaphore_utilization = || {
            metrics::gauge!("loyalty_worker_saturation_percent").set(
                1f64 - semaphore.available_permits() as f64 / self.max_concurrent_events as f64,
            );
        };

        loop {
            report_semaphore_utilization();
            let event = self.wait_for_event().await?;
            spawn_event_processing_task(
                self.queue.clone(),
                self.context.clone(),
                semaphore.clone(),
                event,
            )
            .await;
        }
    }
}

/// Spawn a Tokio task to process a ChangeEvent once we successfully acquire a permit.
async fn spawn_event_processing_task(
    queue: PgEventQueue,
    context: HandlerContext,
    semaphore: Arc<sync::Semaphore>,
    event: ChangeEvent,
) -> tokio::task::JoinHandle<Result<(), WorkerError>> {
    let permit = semaphore
        .acquire_owned()
        .await
        .expect("semaphore has been closed");

    let labels = [("kind", event.entity_kind.to_string())];

    metrics::counter!("loyalty_events_total", &labels).increment(1);

    tokio::spawn(async move {
        let result = process_change_event(queue, context, event).await;
        drop(permit);
        match result {
            Ok(_) => Ok(()),
            Err(error) => {
                error!("failed to process change event: {}", error);
                Err(error)
            }
        }
    })
}

/// Process a change event by transitioning it to its terminal queue state.
///
/// Handler failures (poison payloads, store errors) are logged and the event
/// is marked failed; there is no retry transition and nothing to roll back.
/// There is no caller waiting on these events, so no error escapes the task:
/// the delivery layer is the only retry mechanism.
async fn process_change_event(
    queue: PgEventQueue,
    context: HandlerContext,
    event: ChangeEvent,
) -> Result<(), WorkerError> {
    let labels = [("kind", event.entity_kind.to_string())];

    let now = tokio::time::Instant::now();

    match handlers::process_event(&context, &event).await {
        Ok(outcome) => {
            queue.complete(&event).await?;

            let outcome_labels = [
                ("kind", event.entity_kind.to_string()),
                ("outcome", outcome.as_str().to_owned()),
            ];
            metrics::counter!("loyalty_events_completed", &outcome_labels).increment(1);
            metrics::histogram!("loyalty_events_processing_duration_seconds", &labels)
                .record(now.elapsed().as_secs_f64());

            Ok(())
        }
        Err(handler_error) => {
            error!(
                event = event.id,
                kind = %event.entity_kind,
                "failed to apply change event: {}",
                handler_error
            );
            queue.fail(&event).await?;

            metrics::counter!("loyalty_events_failed", &labels).increment(1);

            Ok(())
        }
    }
}
