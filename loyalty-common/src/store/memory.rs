use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use super::{Document, DocumentStore, FieldSet, FieldValue, StoreError};

/// An in-process `DocumentStore` holding documents in a mutex-guarded map.
///
/// Used as the store double in handler tests, and as a stand-in sink when
/// running without a database. Each operation takes the lock for its full
/// duration, which gives it the same per-operation atomicity the Postgres
/// store gets from single-statement updates.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, HashMap<String, Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document directly, bypassing the store contract. Intended for
    /// test setup and for the write path of in-memory deployments.
    pub fn insert(&self, collection: &str, id: &str, document: Document) {
        let mut collections = self.collections.lock().expect("poisoned MemoryStore mutex");
        drop(
            collections
                .entry(collection.to_owned())
                .or_default()
                .insert(id.to_owned(), document),
        );
    }

    fn server_now() -> Value {
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    fn resolve(fields: FieldSet) -> Document {
        let mut document = Document::new();
        for (field, value) in fields.iter() {
            let resolved = match value {
                FieldValue::Value(value) => value.clone(),
                FieldValue::ServerTimestamp => Self::server_now(),
            };
            drop(document.insert(field.clone(), resolved));
        }
        document
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.lock().expect("poisoned MemoryStore mutex");
        Ok(collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn update(&self, collection: &str, id: &str, fields: FieldSet) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().expect("poisoned MemoryStore mutex");
        if let Some(document) = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
        {
            document.extend(Self::resolve(fields));
        }
        Ok(())
    }

    async fn set_missing(
        &self,
        collection: &str,
        id: &str,
        fields: FieldSet,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().expect("poisoned MemoryStore mutex");
        if let Some(document) = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
        {
            for (field, value) in Self::resolve(fields) {
                _ = document.entry(field).or_insert(value);
            }
        }
        Ok(())
    }

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().expect("poisoned MemoryStore mutex");
        if let Some(document) = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
        {
            let current = document.get(field).and_then(Value::as_i64).unwrap_or(0);
            drop(document.insert(field.to_owned(), Value::from(current + delta)));
        }
        Ok(())
    }

    async fn insert_if_absent(
        &self,
        collection: &str,
        id: &str,
        fields: FieldSet,
    ) -> Result<bool, StoreError> {
        let mut collections = self.collections.lock().expect("poisoned MemoryStore mutex");
        let documents = collections.entry(collection.to_owned()).or_default();
        if documents.contains_key(id) {
            return Ok(false);
        }
        drop(documents.insert(id.to_owned(), Self::resolve(fields)));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn document(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(field, value)| ((*field).to_owned(), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn get_returns_none_for_absent_documents() {
        let store = MemoryStore::new();
        assert!(store.get("customers", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_overwrites_named_fields_only() {
        let store = MemoryStore::new();
        store.insert(
            "customers",
            "c1",
            document(&[("name", json!("Ada")), ("points", json!(7))]),
        );

        store
            .update("customers", "c1", FieldSet::new().set("points", 12))
            .await
            .unwrap();

        let doc = store.get("customers", "c1").await.unwrap().unwrap();
        assert_eq!(doc.get("points"), Some(&json!(12)));
        assert_eq!(doc.get("name"), Some(&json!("Ada")));
    }

    #[tokio::test]
    async fn update_on_absent_document_is_a_noop() {
        let store = MemoryStore::new();
        store
            .update("customers", "ghost", FieldSet::new().set("points", 1))
            .await
            .unwrap();
        assert!(store.get("customers", "ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_missing_guards_each_field_independently() {
        let store = MemoryStore::new();
        store.insert("customers", "c1", document(&[("loyaltyTier", json!("Gold"))]));

        store
            .set_missing(
                "customers",
                "c1",
                FieldSet::new()
                    .set("loyaltyTier", "Bronze")
                    .set("welcomeBonus", 10),
            )
            .await
            .unwrap();

        let doc = store.get("customers", "c1").await.unwrap().unwrap();
        assert_eq!(doc.get("loyaltyTier"), Some(&json!("Gold")));
        assert_eq!(doc.get("welcomeBonus"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn increment_treats_absent_fields_as_zero() {
        let store = MemoryStore::new();
        store.insert("shops", "s1", Document::new());

        store.increment("shops", "s1", "totalCustomers", 1).await.unwrap();
        store.increment("shops", "s1", "totalCustomers", 2).await.unwrap();

        let doc = store.get("shops", "s1").await.unwrap().unwrap();
        assert_eq!(doc.get("totalCustomers"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn insert_if_absent_rejects_the_second_writer() {
        let store = MemoryStore::new();

        let first = store
            .insert_if_absent("processed_events", "visit:v1", FieldSet::new())
            .await
            .unwrap();
        let second = store
            .insert_if_absent("processed_events", "visit:v1", FieldSet::new())
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn server_timestamps_are_resolved_at_write_time() {
        let store = MemoryStore::new();
        store.insert("customers", "c1", Document::new());

        store
            .update(
                "customers",
                "c1",
                FieldSet::new().server_timestamp("lastVisitAt"),
            )
            .await
            .unwrap();

        let doc = store.get("customers", "c1").await.unwrap().unwrap();
        let stamp = doc.get("lastVisitAt").and_then(Value::as_str).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }
}
