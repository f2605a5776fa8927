use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub mod memory;
pub mod postgres;

/// A stored document: a flat JSON object keyed by field name.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Enumeration of errors for operations with a `DocumentStore`.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    Connection { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    Query { command: String, error: sqlx::Error },
}

/// A value to assign to a document field in an update.
/// `ServerTimestamp` is resolved by the store at write time, so concurrent
/// writers never disagree about clocks with the store itself.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(serde_json::Value),
    ServerTimestamp,
}

/// A set of named fields to write in a single store operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet(Vec<(String, FieldValue)>);

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a literal value to a field.
    pub fn set(mut self, field: &str, value: impl Into<serde_json::Value>) -> Self {
        self.0.push((field.to_owned(), FieldValue::Value(value.into())));
        self
    }

    /// Assign the store's current time to a field.
    pub fn server_timestamp(mut self, field: &str) -> Self {
        self.0.push((field.to_owned(), FieldValue::ServerTimestamp));
        self
    }

    /// Append every field of another set, later assignments winning.
    pub fn extend(mut self, other: FieldSet) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (String, FieldValue)> {
        self.0.iter()
    }

    /// Split into literal fields and the names of server-timestamp fields,
    /// for stores that resolve timestamps on their side.
    pub(crate) fn split(&self) -> (Document, Vec<String>) {
        let mut values = Document::new();
        let mut timestamps = Vec::new();

        for (field, value) in &self.0 {
            match value {
                FieldValue::Value(value) => {
                    drop(values.insert(field.clone(), value.clone()));
                }
                FieldValue::ServerTimestamp => timestamps.push(field.clone()),
            }
        }

        (values, timestamps)
    }
}

/// Write every field of a document as a literal value.
impl From<Document> for FieldSet {
    fn from(document: Document) -> Self {
        Self(
            document
                .into_iter()
                .map(|(field, value)| (field, FieldValue::Value(value)))
                .collect(),
        )
    }
}

/// The aggregate store contract: point reads, field updates and atomic
/// numeric increments over documents keyed by `(collection, id)`.
///
/// `increment` and `insert_if_absent` are the only operations that are safe
/// under concurrent callers for the same key; a read followed by an `update`
/// is not, and callers relying on such a sequence must document the race.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read of a document. Returns `None` if the document is absent.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Overwrite the named fields on an existing document. Fields not named
    /// are left untouched. Updating an absent document is a no-op.
    async fn update(&self, collection: &str, id: &str, fields: FieldSet) -> Result<(), StoreError>;

    /// Assign the named fields on an existing document, but only those that
    /// are not already present. The guard is per field and atomic, so a
    /// redelivered event re-running the assignment cannot clobber values
    /// written by the first delivery.
    async fn set_missing(
        &self,
        collection: &str,
        id: &str,
        fields: FieldSet,
    ) -> Result<(), StoreError>;

    /// Atomically add `delta` to a numeric field, treating an absent field
    /// as zero. Never a read-modify-write: concurrent increments on the
    /// same key all take effect.
    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), StoreError>;

    /// Create a document only if no document with this key exists yet.
    /// Returns `true` if the document was created by this call, `false` if
    /// the key was already taken. This is the check-and-set primitive the
    /// event dedup markers are built on.
    async fn insert_if_absent(
        &self,
        collection: &str,
        id: &str,
        fields: FieldSet,
    ) -> Result<bool, StoreError>;
}

/// Decode a document into a typed record.
pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T, serde_json::Error> {
    serde_json::from_value(serde_json::Value::Object(document))
}
