//! In-memory [`TicketStore`] implementation for tests and embedded use.
//!
//! Records live in a `HashMap` behind `std::sync::RwLock`. The approximate
//! index is the same LSH bucketing the SQLite store persists, kept in a
//! side map. The index can be switched off to exercise the exact-scan tier.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::index::band_keys;
use crate::models::{RecordWrite, SimilarityHit, TicketRecord};
use crate::similarity::rank_candidates;

use super::{CandidateVector, IndexQuery, ScanQuery, TicketStore};

/// In-memory store for tests.
pub struct InMemoryStore {
    records: RwLock<HashMap<String, TicketRecord>>,
    buckets: RwLock<HashMap<String, Vec<String>>>,
    index_available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            buckets: RwLock::new(HashMap::new()),
            index_available: AtomicBool::new(true),
        }
    }

    /// A store whose index searches fail, forcing the exact tier.
    pub fn without_index() -> Self {
        let store = Self::new();
        store.set_index_available(false);
        store
    }

    pub fn set_index_available(&self, available: bool) {
        self.index_available.store(available, Ordering::SeqCst);
    }

    /// Insert a record verbatim, bypassing the writer.
    pub fn put_record(&self, record: TicketRecord) {
        let keys = band_keys(&record.embedding);
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.ticket_id.clone(), keys);
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.ticket_id.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TicketStore for InMemoryStore {
    async fn get_record(&self, ticket_id: &str) -> Result<Option<TicketRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(ticket_id).cloned())
    }

    async fn upsert_record(&self, write: &RecordWrite) -> Result<TicketRecord> {
        let keys = band_keys(&write.embedding);
        let stored = {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            let record = match records.get(&write.ticket_id) {
                Some(existing) => write.clone().apply_to(existing),
                None => write.clone().into_new_record(),
            };
            records.insert(record.ticket_id.clone(), record.clone());
            record
        };
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(write.ticket_id.clone(), keys);
        Ok(stored)
    }

    async fn index_search(&self, query: &IndexQuery<'_>) -> Result<Vec<SimilarityHit>> {
        if !self.index_available.load(Ordering::SeqCst) {
            bail!("vector index is not provisioned");
        }
        let wanted: HashSet<String> = band_keys(query.vector).into_iter().collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);

        let mut pool: Vec<&TicketRecord> = records
            .values()
            .filter(|r| !r.embedding.is_empty())
            .filter(|r| r.last_seen_at >= query.seen_from && r.last_seen_at <= query.seen_to)
            .filter(|r| query.site.map_or(true, |s| r.site == s))
            .filter(|r| {
                buckets
                    .get(&r.ticket_id)
                    .is_some_and(|keys| keys.iter().any(|k| wanted.contains(k)))
            })
            .collect();
        pool.sort_by(|a, b| {
            b.last_seen_at
                .cmp(&a.last_seen_at)
                .then(a.ticket_id.cmp(&b.ticket_id))
        });
        pool.truncate(query.num_candidates);

        let candidates = pool.into_iter().map(CandidateVector::from_record).collect();
        let mut hits = rank_candidates(query.vector, candidates);
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn scan_candidates(&self, query: &ScanQuery<'_>) -> Result<Vec<CandidateVector>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .values()
            .filter(|r| r.ticket_id != query.exclude_id)
            .filter(|r| r.first_seen_at >= query.first_seen_since)
            .filter(|r| !r.embedding.is_empty())
            .map(CandidateVector::from_record)
            .collect())
    }
}
