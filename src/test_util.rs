//! Shared helpers for database-backed tests.
//!
//! Tests run against a disposable database created from the DSN in
//! `GARDISTO_TEST_DSN`; when the variable is unset the tests skip with a
//! message instead of failing, so the unit suite stays green without a
//! running PostgreSQL.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Row};
use url::Url;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/db/sql/01_gardisto.sql"
));
const SEED_SQL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/db/sql/seed_catalog.sql"
));

/// Create a fresh, isolated database and apply schema + seed catalog.
/// Returns `None` when `GARDISTO_TEST_DSN` is not set.
pub(crate) async fn test_pool() -> Result<Option<PgPool>> {
    let Ok(dsn) = std::env::var("GARDISTO_TEST_DSN") else {
        eprintln!("Skipping database test: GARDISTO_TEST_DSN not set");
        return Ok(None);
    };

    let admin = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&dsn)
        .await
        .context("failed to connect to test database server")?;

    // One database per test keeps window counts and block rows isolated
    // from concurrently running tests.
    let db_name = format!("gardisto_test_{}", Uuid::new_v4().simple());
    admin
        .execute(format!(r#"CREATE DATABASE "{db_name}""#).as_str())
        .await
        .context("failed to create test database")?;

    let mut url = Url::parse(&dsn).context("failed to parse GARDISTO_TEST_DSN")?;
    url.set_path(&format!("/{db_name}"));

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(url.as_str())
        .await
        .context("failed to connect to test database")?;

    pool.execute(SCHEMA_SQL)
        .await
        .context("failed to apply schema SQL")?;
    pool.execute(SEED_SQL)
        .await
        .context("failed to apply seed catalog SQL")?;

    Ok(Some(pool))
}

pub(crate) fn unique_email(prefix: &str) -> String {
    format!("{prefix}+{}@example.com", Uuid::new_v4().simple())
}

pub(crate) async fn insert_user(pool: &PgPool, email: &str, role: &str) -> Result<Uuid> {
    let row = sqlx::query("INSERT INTO users (email, role) VALUES ($1, $2) RETURNING id")
        .bind(email)
        .bind(role)
        .fetch_one(pool)
        .await
        .context("failed to insert test user")?;
    Ok(row.get("id"))
}
