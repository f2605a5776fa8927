use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use super::{Document, DocumentStore, FieldSet, StoreError};

/// A `DocumentStore` backed by a single PostgreSQL table.
///
/// Documents live in `documents (collection TEXT, id TEXT, data JSONB)`.
/// Every mutation is a single UPDATE or INSERT statement, so each store
/// operation is atomic on its own; server timestamps come from `now()` on
/// the database side.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Initialize a new PostgresStore with its own connection pool.
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| StoreError::Connection { error })?;

        Ok(Self { pool })
    }

    /// Initialize a new PostgresStore from an existing connection pool.
    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let base_query = r#"
SELECT
    data
FROM
    documents
WHERE
    collection = $1 AND id = $2
        "#;

        let document: Option<sqlx::types::Json<Document>> = sqlx::query_scalar(base_query)
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::Query {
                command: "SELECT".to_owned(),
                error,
            })?;

        Ok(document.map(|document| document.0))
    }

    async fn update(&self, collection: &str, id: &str, fields: FieldSet) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let (values, timestamps) = fields.split();

        // The right-hand side of `||` wins on duplicate keys, so the new
        // fields overwrite and everything else is preserved.
        let base_query = r#"
UPDATE
    documents
SET
    data = data || $3 || coalesce(
        (SELECT jsonb_object_agg(field, to_jsonb(now())) FROM unnest($4::text[]) AS field),
        '{}'::jsonb
    )
WHERE
    collection = $1 AND id = $2
        "#;

        _ = sqlx::query(base_query)
            .bind(collection)
            .bind(id)
            .bind(sqlx::types::Json(values))
            .bind(&timestamps)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::Query {
                command: "UPDATE".to_owned(),
                error,
            })?;

        Ok(())
    }

    async fn set_missing(
        &self,
        collection: &str,
        id: &str,
        fields: FieldSet,
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let (values, timestamps) = fields.split();

        // Existing data is concatenated last so present keys keep their
        // current values: the per-field "only if not already set" guard.
        let base_query = r#"
UPDATE
    documents
SET
    data = $3 || coalesce(
        (SELECT jsonb_object_agg(field, to_jsonb(now())) FROM unnest($4::text[]) AS field),
        '{}'::jsonb
    ) || data
WHERE
    collection = $1 AND id = $2
        "#;

        _ = sqlx::query(base_query)
            .bind(collection)
            .bind(id)
            .bind(sqlx::types::Json(values))
            .bind(&timestamps)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::Query {
                command: "UPDATE".to_owned(),
                error,
            })?;

        Ok(())
    }

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), StoreError> {
        let base_query = r#"
UPDATE
    documents
SET
    data = jsonb_set(data, ARRAY[$3], to_jsonb(coalesce((data ->> $3)::bigint, 0) + $4))
WHERE
    collection = $1 AND id = $2
        "#;

        _ = sqlx::query(base_query)
            .bind(collection)
            .bind(id)
            .bind(field)
            .bind(delta)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::Query {
                command: "UPDATE".to_owned(),
                error,
            })?;

        Ok(())
    }

    async fn insert_if_absent(
        &self,
        collection: &str,
        id: &str,
        fields: FieldSet,
    ) -> Result<bool, StoreError> {
        let (values, timestamps) = fields.split();

        let base_query = r#"
INSERT INTO documents
    (collection, id, data)
VALUES
    ($1, $2, $3 || coalesce(
        (SELECT jsonb_object_agg(field, to_jsonb(now())) FROM unnest($4::text[]) AS field),
        '{}'::jsonb
    ))
ON CONFLICT (collection, id) DO NOTHING
        "#;

        let result = sqlx::query(base_query)
            .bind(collection)
            .bind(id)
            .bind(sqlx::types::Json(values))
            .bind(&timestamps)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::Query {
                command: "INSERT".to_owned(),
                error,
            })?;

        Ok(result.rows_affected() == 1)
    }
}
