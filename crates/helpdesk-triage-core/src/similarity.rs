//! Two-tier similarity search over stored ticket embeddings.
//!
//! # Tiers
//!
//! | Tier | Candidate selection | Trigger |
//! |------|---------------------|---------|
//! | [`SearchTier::Index`] | [`TicketStore::index_search`] within ±`index_window` of the anchor's `last_seen_at`, optionally same site, `top_k + 1` results | always tried first |
//! | [`SearchTier::Exact`] | [`TicketStore::scan_candidates`] first seen within `fallback_window` of now | any error from the index tier |
//!
//! Both tiers apply the same threshold, drop the anchor, sort by
//! similarity descending (ties by ticket id ascending) and truncate to
//! `top_k`, so results are comparable regardless of the serving tier.
//!
//! Stored vectors are unit-norm (see [`embed_text`]), so similarity is a
//! plain dot product.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::embedding::{dot, embed_text, EmbeddingProvider};
use crate::models::{SimilarityHit, TicketRecord};
use crate::normalize::normalize_text;
use crate::store::{CandidateVector, IndexQuery, ScanQuery, TicketStore};

/// Failures surfaced to `find_similar` callers.
#[derive(Debug, Error)]
pub enum SimilarityError {
    #[error("ticket not found: {0}")]
    NotFound(String),
    #[error("failed to embed anchor ticket: {0}")]
    Embedding(#[source] anyhow::Error),
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
}

/// Which tier produced a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTier {
    Index,
    Exact,
}

impl SearchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTier::Index => "index",
            SearchTier::Exact => "exact",
        }
    }
}

/// Hits plus the tier that served them.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityReport {
    pub tier: SearchTier,
    pub hits: Vec<SimilarityHit>,
}

/// Tunables shared by both tiers.
#[derive(Debug, Clone)]
pub struct SimilarityParams {
    pub threshold: f64,
    pub index_window: Duration,
    pub fallback_window: Duration,
    pub same_site: bool,
}

impl Default for SimilarityParams {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            index_window: Duration::days(30),
            fallback_window: Duration::days(180),
            same_site: false,
        }
    }
}

/// One similarity query.
#[derive(Debug, Clone)]
pub struct SimilarityRequest<'a> {
    pub ticket_id: &'a str,
    pub top_k: usize,
    pub num_candidates: usize,
    /// Reference time for the exact tier's trailing window.
    pub now: DateTime<Utc>,
}

pub struct SimilarityEngine {
    store: Arc<dyn TicketStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: SimilarityParams,
}

impl SimilarityEngine {
    pub fn new(
        store: Arc<dyn TicketStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        params: SimilarityParams,
    ) -> Self {
        Self {
            store,
            embedder,
            params,
        }
    }

    pub fn params(&self) -> &SimilarityParams {
        &self.params
    }

    /// Tickets similar to `ticket_id`, best first.
    pub async fn find_similar(
        &self,
        ticket_id: &str,
        top_k: usize,
        num_candidates: usize,
    ) -> Result<Vec<SimilarityHit>, SimilarityError> {
        let report = self
            .find_similar_report(&SimilarityRequest {
                ticket_id,
                top_k,
                num_candidates,
                now: Utc::now(),
            })
            .await?;
        Ok(report.hits)
    }

    /// Like [`find_similar`](Self::find_similar), also reporting the tier.
    pub async fn find_similar_report(
        &self,
        req: &SimilarityRequest<'_>,
    ) -> Result<SimilarityReport, SimilarityError> {
        let anchor = self
            .store
            .get_record(req.ticket_id)
            .await
            .map_err(SimilarityError::Store)?
            .ok_or_else(|| SimilarityError::NotFound(req.ticket_id.to_string()))?;

        let query = self.query_vector(&anchor).await?;
        if query.is_empty() || req.top_k == 0 {
            debug!(ticket_id = req.ticket_id, "anchor has no text to compare");
            return Ok(SimilarityReport {
                tier: SearchTier::Exact,
                hits: Vec::new(),
            });
        }

        match self.index_tier(&anchor, &query, req).await {
            Ok(hits) => {
                debug!(ticket_id = req.ticket_id, hits = hits.len(), "served by index");
                Ok(SimilarityReport {
                    tier: SearchTier::Index,
                    hits,
                })
            }
            Err(e) => {
                warn!(ticket_id = req.ticket_id, error = %e, "index search failed, falling back to exact scan");
                let hits = self.exact_tier(&anchor, &query, req).await?;
                Ok(SimilarityReport {
                    tier: SearchTier::Exact,
                    hits,
                })
            }
        }
    }

    async fn query_vector(&self, anchor: &TicketRecord) -> Result<Vec<f32>, SimilarityError> {
        if !anchor.embedding.is_empty() {
            return Ok(anchor.embedding.clone());
        }
        let text = if anchor.normalized_text.trim().is_empty() {
            normalize_text(&anchor.subject, &anchor.description)
        } else {
            anchor.normalized_text.clone()
        };
        embed_text(self.embedder.as_ref(), &text)
            .await
            .map_err(SimilarityError::Embedding)
    }

    async fn index_tier(
        &self,
        anchor: &TicketRecord,
        query: &[f32],
        req: &SimilarityRequest<'_>,
    ) -> anyhow::Result<Vec<SimilarityHit>> {
        let q = IndexQuery {
            vector: query,
            num_candidates: req.num_candidates,
            limit: req.top_k.saturating_add(1),
            seen_from: anchor.last_seen_at - self.params.index_window,
            seen_to: anchor.last_seen_at + self.params.index_window,
            site: self.params.same_site.then_some(anchor.site.as_str()),
        };
        let hits = self.store.index_search(&q).await?;
        Ok(finalize_hits(
            hits,
            &anchor.ticket_id,
            self.params.threshold,
            req.top_k,
        ))
    }

    async fn exact_tier(
        &self,
        anchor: &TicketRecord,
        query: &[f32],
        req: &SimilarityRequest<'_>,
    ) -> Result<Vec<SimilarityHit>, SimilarityError> {
        let candidates = self
            .store
            .scan_candidates(&ScanQuery {
                first_seen_since: req.now - self.params.fallback_window,
                exclude_id: &anchor.ticket_id,
            })
            .await
            .map_err(SimilarityError::Store)?;
        let scored = rank_candidates(query, candidates);
        Ok(finalize_hits(
            scored,
            &anchor.ticket_id,
            self.params.threshold,
            req.top_k,
        ))
    }
}

/// Score candidates against a unit-norm query by dot product, best first.
///
/// Candidates with an empty embedding or a dimension different from the
/// query are skipped.
pub fn rank_candidates(query: &[f32], candidates: Vec<CandidateVector>) -> Vec<SimilarityHit> {
    let mut hits: Vec<SimilarityHit> = candidates
        .into_iter()
        .filter(|c| !c.embedding.is_empty() && c.embedding.len() == query.len())
        .map(|c| {
            let score = dot(query, &c.embedding) as f64;
            c.into_hit(score)
        })
        .collect();
    sort_hits(&mut hits);
    hits
}

fn sort_hits(hits: &mut [SimilarityHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.ticket_id.cmp(&b.ticket_id))
    });
}

/// Drop the anchor and sub-threshold hits, sort, and truncate to `top_k`.
fn finalize_hits(
    mut hits: Vec<SimilarityHit>,
    anchor_id: &str,
    threshold: f64,
    top_k: usize,
) -> Vec<SimilarityHit> {
    hits.retain(|h| h.ticket_id != anchor_id && h.similarity >= threshold);
    sort_hits(&mut hits);
    hits.truncate(top_k);
    hits
}
