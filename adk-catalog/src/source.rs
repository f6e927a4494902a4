//! Relational catalog sources for startup reconciliation.
//!
//! [`PostgresCatalogSource`] (feature `postgres`) reads classification rows
//! with [sqlx](https://docs.rs/sqlx). Any other source can be plugged in by
//! implementing [`CatalogSource`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One row of the relational catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRecord {
    pub code: String,
    pub name: String,
    /// May be missing or blank; reconciliation falls back to the name.
    pub description: Option<String>,
}

impl SourceRecord {
    pub fn new(code: impl Into<String>, name: impl Into<String>, description: Option<&str>) -> Self {
        Self { code: code.into(), name: name.into(), description: description.map(str::to_string) }
    }
}

/// A read-only source of catalog records.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// A short name used in logs.
    fn name(&self) -> &str;

    /// Fetch every record that should populate the catalog collection.
    async fn fetch(&self) -> Result<Vec<SourceRecord>>;
}

#[cfg(feature = "postgres")]
pub use postgres::PostgresCatalogSource;

#[cfg(feature = "postgres")]
mod postgres {
    use async_trait::async_trait;
    use sqlx::postgres::PgPoolOptions;
    use sqlx::{PgPool, Row};
    use tracing::{debug, warn};

    use super::{CatalogSource, SourceRecord};
    use crate::config::SourceConfig;
    use crate::error::{CatalogError, Result};

    /// Reads one level of a classification system from PostgreSQL.
    ///
    /// Expects the tables `classification_systems (id, code)` and
    /// `categories (system_id, level_code, code, name, description)`.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use adk_catalog::{PostgresCatalogSource, SourceConfig};
    ///
    /// let source = PostgresCatalogSource::connect(&SourceConfig::default()).await?;
    /// let rows = source.fetch().await?;
    /// ```
    pub struct PostgresCatalogSource {
        pool: PgPool,
        system_code: String,
        level_code: String,
    }

    impl PostgresCatalogSource {
        /// Connect lazily; the first query opens the connection.
        pub fn connect_lazy(config: &SourceConfig) -> Result<Self> {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect_lazy(&config.database_url())
                .map_err(map_err)?;
            Ok(Self::from_pool(pool, &config.system_code, &config.level_code))
        }

        /// Connect eagerly.
        pub async fn connect(config: &SourceConfig) -> Result<Self> {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.database_url())
                .await
                .map_err(map_err)?;
            Ok(Self::from_pool(pool, &config.system_code, &config.level_code))
        }

        /// Create a source from an existing connection pool.
        pub fn from_pool(pool: PgPool, system_code: &str, level_code: &str) -> Self {
            Self { pool, system_code: system_code.to_string(), level_code: level_code.to_string() }
        }

        /// Close the pool.
        pub async fn close(&self) {
            self.pool.close().await;
        }
    }

    fn map_err(e: sqlx::Error) -> CatalogError {
        CatalogError::Source(e.to_string())
    }

    #[async_trait]
    impl CatalogSource for PostgresCatalogSource {
        fn name(&self) -> &str {
            "postgres"
        }

        async fn fetch(&self) -> Result<Vec<SourceRecord>> {
            let system_id: Option<i64> = sqlx::query(
                "SELECT id::bigint AS id FROM classification_systems WHERE code = $1 LIMIT 1",
            )
            .bind(&self.system_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?
            .map(|row| row.try_get("id"))
            .transpose()
            .map_err(map_err)?;

            let Some(system_id) = system_id else {
                warn!(system = %self.system_code, "classification system not found");
                return Ok(Vec::new());
            };

            let rows = sqlx::query(
                "SELECT code, name, description FROM categories \
                 WHERE system_id = $1 AND level_code = $2 ORDER BY code",
            )
            .bind(system_id)
            .bind(&self.level_code)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;

            let records = rows
                .iter()
                .map(|row| {
                    Ok(SourceRecord {
                        code: row.try_get("code")?,
                        name: row.try_get("name")?,
                        description: row.try_get("description")?,
                    })
                })
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                .map_err(map_err)?;

            debug!(system = %self.system_code, level = %self.level_code, count = records.len(), "fetched catalog rows");
            Ok(records)
        }
    }
}
