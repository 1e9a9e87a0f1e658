use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect a Postgres pool sized for the sync/feed workload.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await
}

/// Run the embedded SQL migrations (workspace-level `migrations/` directory).
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}
