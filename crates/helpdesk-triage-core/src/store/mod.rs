//! Storage abstraction for ticket records.
//!
//! The [`TicketStore`] trait defines every storage operation the record
//! writer and the similarity engine need, so the SQLite backend and the
//! in-memory backend are interchangeable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{RecordWrite, SimilarityHit, TicketRecord};

/// Parameters for an approximate (index) search.
#[derive(Debug, Clone)]
pub struct IndexQuery<'a> {
    /// Unit-norm query vector.
    pub vector: &'a [f32],
    /// Candidate pool the index may examine before scoring.
    pub num_candidates: usize,
    /// Maximum hits to return.
    pub limit: usize,
    /// Inclusive window over `last_seen_at`.
    pub seen_from: DateTime<Utc>,
    pub seen_to: DateTime<Utc>,
    /// Restrict to records at this site.
    pub site: Option<&'a str>,
}

/// Parameters for the exact-scan candidate read.
#[derive(Debug, Clone)]
pub struct ScanQuery<'a> {
    /// Only records with `first_seen_at >= first_seen_since`.
    pub first_seen_since: DateTime<Utc>,
    /// Record to leave out (the anchor).
    pub exclude_id: &'a str,
}

/// A stored vector plus the fields a [`SimilarityHit`] needs.
#[derive(Debug, Clone)]
pub struct CandidateVector {
    pub ticket_id: String,
    pub subject: String,
    pub category: String,
    pub site: String,
    pub embedding: Vec<f32>,
}

impl CandidateVector {
    pub fn from_record(record: &TicketRecord) -> Self {
        Self {
            ticket_id: record.ticket_id.clone(),
            subject: record.subject.clone(),
            category: record.category.clone(),
            site: record.site.clone(),
            embedding: record.embedding.clone(),
        }
    }

    pub fn into_hit(self, similarity: f64) -> SimilarityHit {
        SimilarityHit {
            ticket_id: self.ticket_id,
            similarity,
            subject: self.subject,
            category: self.category,
            site: self.site,
        }
    }
}

/// Abstract storage backend for ticket records.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_ready`](TicketStore::ensure_ready) | Open connections and create schema |
/// | [`get_record`](TicketStore::get_record) | Fetch one record by ticket id |
/// | [`upsert_record`](TicketStore::upsert_record) | Atomic insert-or-update keyed on ticket id |
/// | [`index_search`](TicketStore::index_search) | Approximate vector search; errors when no index is provisioned |
/// | [`scan_candidates`](TicketStore::scan_candidates) | Read recent embedded records for an exact scan |
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Idempotent readiness check. Called before the first operation.
    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn get_record(&self, ticket_id: &str) -> Result<Option<TicketRecord>>;

    /// Insert or update one record and return the stored state.
    ///
    /// `first_seen_at` is set only on insert. The recurrence-group fields
    /// are never touched. Concurrent upserts of the same id must leave
    /// exactly one record.
    async fn upsert_record(&self, write: &RecordWrite) -> Result<TicketRecord>;

    /// Approximate nearest neighbours, scored by dot product and sorted
    /// descending. May include the anchor; the caller filters it.
    async fn index_search(&self, query: &IndexQuery<'_>) -> Result<Vec<SimilarityHit>>;

    /// Records first seen inside the scan window, excluding the anchor,
    /// that carry a non-empty embedding.
    async fn scan_candidates(&self, query: &ScanQuery<'_>) -> Result<Vec<CandidateVector>>;
}
