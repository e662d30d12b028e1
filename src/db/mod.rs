//! Postgres pool for the chat store.
//!
//! `main` calls [`init_pool`] once; the pool is handed to `PgStore` and the
//! embedded migrations (users, products, sessions, orders, chat rooms,
//! messages and their images) are applied before the listener binds.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Connect with at most `max_connections` and bring the schema up to date.
///
/// # Errors
///
/// Connection failures and failed migrations.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}
