//! `htriage similar`: find stored tickets similar to a given one.

use anyhow::{bail, Result};
use chrono::Duration;
use std::sync::Arc;

use helpdesk_triage_core::similarity::{
    SimilarityEngine, SimilarityError, SimilarityParams, SimilarityReport, SimilarityRequest,
};

use crate::config::{Config, SimilarityConfig};
use crate::embedding::create_provider;
use crate::sqlite_store::SqliteStore;

pub fn similarity_params(config: &SimilarityConfig) -> SimilarityParams {
    SimilarityParams {
        threshold: config.threshold,
        index_window: Duration::days(config.index_window_days),
        fallback_window: Duration::days(config.fallback_window_days),
        same_site: config.same_site,
    }
}

/// Resolve `k` / `candidates` overrides against the configured defaults.
pub fn resolve_limits(
    config: &SimilarityConfig,
    k: Option<usize>,
    candidates: Option<usize>,
) -> Result<(usize, usize)> {
    let top_k = k.unwrap_or(config.top_k);
    if top_k == 0 {
        bail!("k must be >= 1");
    }
    let pool = candidates.unwrap_or(config.num_candidates).max(top_k.saturating_add(1));
    Ok((top_k, pool))
}

pub async fn run_similar(
    config: &Config,
    ticket_id: &str,
    k: Option<usize>,
    candidates: Option<usize>,
) -> Result<()> {
    let (top_k, num_candidates) = resolve_limits(&config.similarity, k, candidates)?;
    let store = Arc::new(SqliteStore::new(
        &config.db.path,
        config.similarity.index_enabled,
    ));
    let embedder = create_provider(&config.embedding)?;
    let engine = SimilarityEngine::new(
        store.clone(),
        embedder,
        similarity_params(&config.similarity),
    );

    let outcome = engine
        .find_similar_report(&SimilarityRequest {
            ticket_id,
            top_k,
            num_candidates,
            now: chrono::Utc::now(),
        })
        .await;
    store.close().await;

    match outcome {
        Ok(report) => {
            print_report(ticket_id, &report, config.similarity.threshold);
            Ok(())
        }
        Err(SimilarityError::NotFound(id)) => bail!("Ticket not found: {}", id),
        Err(e) => Err(e.into()),
    }
}

fn print_report(ticket_id: &str, report: &SimilarityReport, threshold: f64) {
    if report.hits.is_empty() {
        println!(
            "No tickets similar to {} at threshold {:.2} (tier: {}).",
            ticket_id,
            threshold,
            report.tier.as_str()
        );
        return;
    }

    println!(
        "Similar to {} (tier: {}, threshold {:.2}):",
        ticket_id,
        report.tier.as_str(),
        threshold
    );
    println!();
    for (i, hit) in report.hits.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} {}",
            i + 1,
            hit.similarity,
            hit.ticket_id,
            hit.subject
        );
        println!("    category: {}", hit.category);
        if !hit.site.is_empty() {
            println!("    site: {}", hit.site);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_limits() {
        let cfg = SimilarityConfig::default();
        assert_eq!(resolve_limits(&cfg, None, None).unwrap(), (5, 100));
        assert_eq!(resolve_limits(&cfg, Some(3), Some(2)).unwrap(), (3, 4));
        assert!(resolve_limits(&cfg, Some(0), None).is_err());
    }

    #[test]
    fn test_resolve_limits_huge_k_saturates() {
        let cfg = SimilarityConfig::default();
        let (k, pool) = resolve_limits(&cfg, Some(usize::MAX), None).unwrap();
        assert_eq!(k, usize::MAX);
        assert_eq!(pool, usize::MAX);
    }

    #[test]
    fn test_params_from_config() {
        let p = similarity_params(&SimilarityConfig::default());
        assert_eq!(p.threshold, 0.9);
        assert_eq!(p.index_window, Duration::days(30));
        assert_eq!(p.fallback_window, Duration::days(180));
        assert!(!p.same_site);
    }
}
