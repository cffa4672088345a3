//! SQLite-backed [`TicketStore`] implementation.
//!
//! The pool is opened lazily on first use and shared afterwards; the first
//! caller also applies the schema. Every upsert runs in one transaction
//! that writes the `tickets` row and rewrites its LSH buckets, so a record
//! and its index entries never disagree.
//!
//! The approximate index is the `ticket_buckets` table. When the store is
//! built with the index disabled, [`TicketStore::index_search`] fails and
//! the similarity engine serves from the exact scan.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use tokio::sync::OnceCell;

use helpdesk_triage_core::embedding::{blob_to_vec, vec_to_blob};
use helpdesk_triage_core::index::band_keys;
use helpdesk_triage_core::models::{RecordWrite, SimilarityHit, TicketRecord};
use helpdesk_triage_core::similarity::rank_candidates;
use helpdesk_triage_core::store::{CandidateVector, IndexQuery, ScanQuery, TicketStore};

use crate::{db, migrate};

/// SQLite implementation of the [`TicketStore`] trait.
pub struct SqliteStore {
    path: PathBuf,
    pool: OnceCell<SqlitePool>,
    index_enabled: bool,
}

impl SqliteStore {
    /// A store that connects to `path` on first use.
    pub fn new(path: impl Into<PathBuf>, index_enabled: bool) -> Self {
        Self {
            path: path.into(),
            pool: OnceCell::new(),
            index_enabled,
        }
    }

    /// Wrap an already-open pool. The schema is still applied on first use.
    pub fn from_pool(pool: SqlitePool, index_enabled: bool) -> Self {
        Self {
            path: PathBuf::new(),
            pool: OnceCell::new_with(Some(pool)),
            index_enabled,
        }
    }

    async fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .get_or_try_init(|| async {
                let pool = db::connect(&self.path).await?;
                migrate::apply(&pool).await?;
                tracing::info!(path = %self.path.display(), "database connected");
                Ok::<_, anyhow::Error>(pool)
            })
            .await
    }

    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn row_to_record(row: &SqliteRow) -> Result<TicketRecord> {
    let blob: Vec<u8> = row.try_get("embedding")?;
    let dim: i64 = row.try_get("embedding_dim")?;
    Ok(TicketRecord {
        ticket_id: row.try_get("ticket_id")?,
        site: row.try_get("site")?,
        isp: row.try_get("isp")?,
        category: row.try_get("category")?,
        subject: row.try_get("subject")?,
        description: row.try_get("description")?,
        status: row.try_get("status")?,
        priority: row.try_get("priority")?,
        normalized_text: row.try_get("normalized_text")?,
        signature: row.try_get("signature")?,
        embedding: blob_to_vec(&blob),
        embedding_model: row.try_get("embedding_model")?,
        embedding_dim: dim.max(0) as usize,
        first_seen_at: from_millis(row.try_get("first_seen_at")?)?,
        last_seen_at: from_millis(row.try_get("last_seen_at")?)?,
        recurrence_group: row.try_get("recurrence_group")?,
        group_similarity: row.try_get("group_similarity")?,
    })
}

fn row_to_candidate(row: &SqliteRow) -> Result<CandidateVector> {
    let blob: Vec<u8> = row.try_get("embedding")?;
    Ok(CandidateVector {
        ticket_id: row.try_get("ticket_id")?,
        subject: row.try_get("subject")?,
        category: row.try_get("category")?,
        site: row.try_get("site")?,
        embedding: blob_to_vec(&blob),
    })
}

const SELECT_RECORD: &str = r#"
    SELECT ticket_id, site, isp, category, subject, description, status, priority,
           normalized_text, signature, embedding, embedding_model, embedding_dim,
           first_seen_at, last_seen_at, recurrence_group, group_similarity
    FROM tickets
    WHERE ticket_id = ?
"#;

#[async_trait]
impl TicketStore for SqliteStore {
    async fn ensure_ready(&self) -> Result<()> {
        self.pool().await.map(|_| ())
    }

    async fn get_record(&self, ticket_id: &str) -> Result<Option<TicketRecord>> {
        let pool = self.pool().await?;
        let row = sqlx::query(SELECT_RECORD)
            .bind(ticket_id)
            .fetch_optional(pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn upsert_record(&self, write: &RecordWrite) -> Result<TicketRecord> {
        let pool = self.pool().await?;
        let seen = to_millis(write.seen_at);
        let blob = vec_to_blob(&write.embedding);
        let keys = band_keys(&write.embedding);

        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO tickets (ticket_id, site, isp, category, subject, description,
                                 status, priority, normalized_text, signature, embedding,
                                 embedding_model, embedding_dim, first_seen_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(ticket_id) DO UPDATE SET
                site = excluded.site,
                isp = excluded.isp,
                category = excluded.category,
                subject = excluded.subject,
                description = excluded.description,
                status = excluded.status,
                priority = excluded.priority,
                normalized_text = excluded.normalized_text,
                signature = excluded.signature,
                embedding = excluded.embedding,
                embedding_model = excluded.embedding_model,
                embedding_dim = excluded.embedding_dim,
                last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(&write.ticket_id)
        .bind(&write.fields.site)
        .bind(&write.fields.isp)
        .bind(&write.fields.category)
        .bind(&write.fields.subject)
        .bind(&write.fields.description)
        .bind(&write.fields.status)
        .bind(&write.fields.priority)
        .bind(&write.normalized_text)
        .bind(&write.signature)
        .bind(&blob)
        .bind(&write.embedding_model)
        .bind(write.embedding.len() as i64)
        .bind(seen)
        .bind(seen)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM ticket_buckets WHERE ticket_id = ?")
            .bind(&write.ticket_id)
            .execute(&mut *tx)
            .await?;

        for key in &keys {
            sqlx::query("INSERT INTO ticket_buckets (band_key, ticket_id) VALUES (?, ?)")
                .bind(key)
                .bind(&write.ticket_id)
                .execute(&mut *tx)
                .await?;
        }

        let row = sqlx::query(SELECT_RECORD)
            .bind(&write.ticket_id)
            .fetch_one(&mut *tx)
            .await?;
        let record = row_to_record(&row)?;

        tx.commit().await?;
        Ok(record)
    }

    async fn index_search(&self, query: &IndexQuery<'_>) -> Result<Vec<SimilarityHit>> {
        if !self.index_enabled {
            bail!("vector index is not provisioned");
        }
        let keys = band_keys(query.vector);
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let pool = self.pool().await?;

        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            r#"
            SELECT t.ticket_id, t.subject, t.category, t.site, t.embedding
            FROM tickets t
            WHERE t.ticket_id IN (
                SELECT DISTINCT ticket_id FROM ticket_buckets WHERE band_key IN ({})
            )
              AND t.last_seen_at BETWEEN ? AND ?
              AND (? IS NULL OR t.site = ?)
              AND t.embedding_dim > 0
            ORDER BY t.last_seen_at DESC, t.ticket_id ASC
            LIMIT ?
            "#,
            placeholders
        );

        let mut q = sqlx::query(&sql);
        for key in &keys {
            q = q.bind(key);
        }
        let rows = q
            .bind(to_millis(query.seen_from))
            .bind(to_millis(query.seen_to))
            .bind(query.site)
            .bind(query.site)
            .bind(i64::try_from(query.num_candidates).unwrap_or(i64::MAX))
            .fetch_all(pool)
            .await
            .context("index query failed")?;

        let candidates = rows
            .iter()
            .map(row_to_candidate)
            .collect::<Result<Vec<_>>>()?;
        let mut hits = rank_candidates(query.vector, candidates);
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn scan_candidates(&self, query: &ScanQuery<'_>) -> Result<Vec<CandidateVector>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            r#"
            SELECT ticket_id, subject, category, site, embedding
            FROM tickets
            WHERE first_seen_at >= ?
              AND ticket_id != ?
              AND embedding_dim > 0
            "#,
        )
        .bind(to_millis(query.first_seen_since))
        .bind(query.exclude_id)
        .fetch_all(pool)
        .await?;

        rows.iter().map(row_to_candidate).collect()
    }
}
