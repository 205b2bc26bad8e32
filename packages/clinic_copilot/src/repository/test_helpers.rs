//! Shared test fixtures for repository tests.

use sqlx::sqlite::SqlitePoolOptions;

use super::CrmRepository;

/// In-memory repository with the full schema applied.
pub(crate) async fn test_repository() -> CrmRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    crate::db::run_migrations(&pool).await.unwrap();
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .unwrap();
    CrmRepository::new(pool)
}
