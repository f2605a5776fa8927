use loyalty_common::eventqueue::QueueError;
use loyalty_common::store::StoreError;
use thiserror::Error;

/// Enumeration of errors produced while applying a change event.
/// Every variant is terminal for that event: the handler logs and the event
/// is marked failed, never retried in-process.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("failed to parse event payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("a store error occurred when applying an event")]
    Store(#[from] StoreError),
}

/// Enumeration of errors related to initialization and consumption of change events.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("a queue error occurred when consuming events")]
    Queue(#[from] QueueError),
}
