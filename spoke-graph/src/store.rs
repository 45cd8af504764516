use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::error::ResolveError;
use crate::resolver::ModuleStore;

/// SQLite-backed [`ModuleStore`]: the registry's authoritative schema
/// texts, keyed by `(module, version)`.
///
/// Versions are immutable releases: publishing the same version twice
/// is an error, not an overwrite.
#[derive(Clone)]
pub struct SqliteModuleStore {
    pool: SqlitePool,
}

impl SqliteModuleStore {
    /// Wrap an existing pool. Call [`migrate`](Self::migrate) before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) a database at `url`, e.g. `sqlite://spoke.db`.
    pub async fn connect(url: &str) -> Result<Self, ResolveError> {
        let pool = SqlitePool::connect(url)
            .await
            .map_err(|err| ResolveError::Store(err.to_string()))?;
        Ok(Self::new(pool))
    }

    /// A private in-memory database, for tests and embedding.
    ///
    /// One connection only: each SQLite `:memory:` connection is its own
    /// database, so a wider pool would see different data per connection.
    pub async fn in_memory() -> Result<Self, ResolveError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|err| ResolveError::Store(err.to_string()))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the schema. Idempotent.
    pub async fn migrate(&self) -> Result<(), ResolveError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS module_schemas (
                module TEXT NOT NULL,
                version TEXT NOT NULL,
                schema_text TEXT NOT NULL,
                PRIMARY KEY (module, version)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|err| ResolveError::Store(err.to_string()))?;
        Ok(())
    }

    /// Store the schema text for a new `(module, version)`.
    pub async fn publish_schema(
        &self,
        module: &str,
        version: &str,
        schema: &str,
    ) -> Result<(), ResolveError> {
        sqlx::query("INSERT INTO module_schemas (module, version, schema_text) VALUES (?, ?, ?)")
            .bind(module)
            .bind(version)
            .bind(schema)
            .execute(&self.pool)
            .await
            .map_err(|err| ResolveError::Store(err.to_string()))?;
        tracing::info!(module, version, "schema published");
        Ok(())
    }

    /// All stored versions of a module, newest insertion last.
    pub async fn versions(&self, module: &str) -> Result<Vec<String>, ResolveError> {
        let rows = sqlx::query(
            "SELECT version FROM module_schemas WHERE module = ? ORDER BY rowid",
        )
        .bind(module)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| ResolveError::Store(err.to_string()))?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("version")
                    .map_err(|err| ResolveError::Store(err.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl ModuleStore for SqliteModuleStore {
    async fn schema_text(&self, module: &str, version: &str) -> Result<String, ResolveError> {
        let row = sqlx::query(
            "SELECT schema_text FROM module_schemas WHERE module = ? AND version = ?",
        )
        .bind(module)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| ResolveError::Store(err.to_string()))?;

        match row {
            Some(row) => row
                .try_get("schema_text")
                .map_err(|err| ResolveError::Store(err.to_string())),
            None => Err(ResolveError::ModuleNotFound {
                module: module.to_string(),
                version: version.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_fetch_round_trip() {
        let store = SqliteModuleStore::in_memory().await.unwrap();
        store
            .publish_schema("common", "v1.0.0", "syntax = \"proto3\";")
            .await
            .unwrap();

        let text = store.schema_text("common", "v1.0.0").await.unwrap();
        assert!(text.contains("proto3"));
    }

    #[tokio::test]
    async fn missing_version_is_not_found() {
        let store = SqliteModuleStore::in_memory().await.unwrap();
        let err = store.schema_text("common", "v9.9.9").await.unwrap_err();
        assert!(matches!(err, ResolveError::ModuleNotFound { .. }));
    }

    #[tokio::test]
    async fn republishing_a_version_is_rejected() {
        let store = SqliteModuleStore::in_memory().await.unwrap();
        store.publish_schema("common", "v1.0.0", "a").await.unwrap();
        let err = store.publish_schema("common", "v1.0.0", "b").await.unwrap_err();
        assert!(matches!(err, ResolveError::Store(_)));

        // The original text survives.
        assert_eq!(store.schema_text("common", "v1.0.0").await.unwrap(), "a");
    }

    #[tokio::test]
    async fn versions_list_in_publish_order() {
        let store = SqliteModuleStore::in_memory().await.unwrap();
        store.publish_schema("common", "v1.0.0", "a").await.unwrap();
        store.publish_schema("common", "v1.1.0", "b").await.unwrap();
        store.publish_schema("other", "v1.0.0", "c").await.unwrap();

        assert_eq!(store.versions("common").await.unwrap(), vec!["v1.0.0", "v1.1.0"]);
    }
}
