//! Embedded schema migrations.
//!
//! The store carries a monotone integer version in `schema_migrations`.
//! On open, every migration whose number exceeds the stored version is
//! applied in order. A stored version beyond the latest known migration
//! means the database was written by a newer tool and is refused.

use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

pub fn all_embedded_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Base schema",
            sql: include_str!("../../../migrations/001_initial_schema.sql"),
        },
        Migration {
            version: 2,
            description: "Normalize legacy task statuses",
            sql: include_str!("../../../migrations/002_status_normalization.sql"),
        },
        Migration {
            version: 3,
            description: "Agent registry",
            sql: include_str!("../../../migrations/003_agent_registry.sql"),
        },
        Migration {
            version: 4,
            description: "Normalized completion-spec tables",
            sql: include_str!("../../../migrations/004_completion_specs.sql"),
        },
    ]
}

pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply all pending migrations, returning how many ran.
    pub async fn run(&self) -> DomainResult<usize> {
        self.ensure_migrations_table().await?;

        let migrations = all_embedded_migrations();
        let latest = migrations.last().map_or(0, |m| m.version);
        let current = self.current_version().await?;

        if current > latest {
            return Err(DomainError::StoreCorruption(format!(
                "schema version {current} is newer than supported version {latest}"
            )));
        }

        let pending: Vec<_> = migrations
            .into_iter()
            .filter(|m| m.version > current)
            .collect();

        for migration in &pending {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "Applying schema migration"
            );
            self.apply(migration).await?;
        }

        Ok(pending.len())
    }

    pub async fn current_version(&self) -> DomainResult<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map_or(0, |(v,)| v))
    }

    async fn ensure_migrations_table(&self) -> DomainResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                description TEXT
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply(&self, migration: &Migration) -> DomainResult<()> {
        sqlx::raw_sql(migration.sql).execute(&self.pool).await?;

        sqlx::query("INSERT OR IGNORE INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_memory_pool;

    #[tokio::test]
    async fn test_migrations_apply_once() {
        let pool = create_memory_pool().await.unwrap();
        let migrator = Migrator::new(pool.clone());

        let applied = migrator.run().await.unwrap();
        assert_eq!(applied, 4);
        assert_eq!(migrator.current_version().await.unwrap(), 4);

        // Second run is a no-op.
        let applied = migrator.run().await.unwrap();
        assert_eq!(applied, 0);
    }

    #[tokio::test]
    async fn test_future_schema_version_refused() {
        let pool = create_memory_pool().await.unwrap();
        let migrator = Migrator::new(pool.clone());
        migrator.run().await.unwrap();

        sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (99, 'future')")
            .execute(&pool)
            .await
            .unwrap();

        let err = migrator.run().await.unwrap_err();
        assert!(matches!(err, DomainError::StoreCorruption(_)));
    }

    #[tokio::test]
    async fn test_v2_normalizes_legacy_statuses() {
        let pool = create_memory_pool().await.unwrap();

        // Apply only the base schema, insert legacy rows, then migrate.
        let migrations = all_embedded_migrations();
        sqlx::raw_sql(migrations[0].sql).execute(&pool).await.unwrap();
        sqlx::query(
            "CREATE TABLE schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                description TEXT
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO schema_migrations (version) VALUES (1)")
            .execute(&pool)
            .await
            .unwrap();

        sqlx::query(
            "INSERT INTO specs (id, title, status, created_at, updated_at)
             VALUES ('s', 'S', 'draft', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();
        for (id, status) in [
            ("t1", "pending"),
            ("t2", "in_progress"),
            ("t3", "qa"),
            ("t4", "completed"),
        ] {
            sqlx::query(
                "INSERT INTO tasks (id, spec_id, title, status, created_at, updated_at)
                 VALUES (?, 's', 'T', ?, '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
            )
            .bind(id)
            .bind(status)
            .execute(&pool)
            .await
            .unwrap();
        }

        Migrator::new(pool.clone()).run().await.unwrap();

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, status FROM tasks ORDER BY id")
                .fetch_all(&pool)
                .await
                .unwrap();
        let statuses: Vec<&str> = rows.iter().map(|(_, s)| s.as_str()).collect();
        assert_eq!(statuses, vec!["todo", "implementing", "reviewing", "done"]);
    }
}
