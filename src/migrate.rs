use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database file and schema for `htriage init`.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema creation on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Timestamps are unix milliseconds; embeddings are little-endian f32 BLOBs.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tickets (
            ticket_id TEXT PRIMARY KEY,
            site TEXT NOT NULL DEFAULT '',
            isp TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT '',
            subject TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT '',
            priority TEXT NOT NULL DEFAULT '',
            normalized_text TEXT NOT NULL,
            signature TEXT NOT NULL,
            embedding BLOB NOT NULL,
            embedding_model TEXT NOT NULL,
            embedding_dim INTEGER NOT NULL,
            first_seen_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,
            recurrence_group TEXT,
            group_similarity REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // LSH buckets, rewritten on every upsert
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ticket_buckets (
            band_key TEXT NOT NULL,
            ticket_id TEXT NOT NULL,
            PRIMARY KEY (band_key, ticket_id),
            FOREIGN KEY (ticket_id) REFERENCES tickets(ticket_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tickets_last_seen ON tickets(last_seen_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tickets_first_seen ON tickets(first_seen_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tickets_site ON tickets(site)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tickets_signature ON tickets(signature)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ticket_buckets_ticket ON ticket_buckets(ticket_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
