//! Core data models used throughout helpdesk-triage.
//!
//! These types represent the persisted ticket records, the writes that
//! produce them, similarity hits, and triage results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A persisted ticket, one per external ticket id.
///
/// `normalized_text`, `signature` and `embedding` are derived from
/// `subject` + `description` and are always written together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub ticket_id: String,
    pub site: String,
    pub isp: String,
    pub category: String,
    pub subject: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub normalized_text: String,
    pub signature: String,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub embedding_dim: usize,
    /// Set on insert, never updated.
    pub first_seen_at: DateTime<Utc>,
    /// Refreshed on every upsert.
    pub last_seen_at: DateTime<Utc>,
    /// Assigned by an external clustering job; upserts leave it untouched.
    pub recurrence_group: Option<String>,
    pub group_similarity: Option<f64>,
}

/// Mutable, caller-supplied ticket fields (last write wins).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketFields {
    pub site: String,
    pub isp: String,
    pub category: String,
    pub subject: String,
    pub description: String,
    pub status: String,
    pub priority: String,
}

/// Everything a store needs to perform one atomic upsert.
///
/// Built by [`RecordWriter`](crate::records::RecordWriter); callers never
/// construct the derived fields themselves.
#[derive(Debug, Clone)]
pub struct RecordWrite {
    pub ticket_id: String,
    pub fields: TicketFields,
    pub normalized_text: String,
    pub signature: String,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub seen_at: DateTime<Utc>,
}

impl RecordWrite {
    /// Materialize the record a fresh insert would produce.
    pub fn into_new_record(self) -> TicketRecord {
        let dim = self.embedding.len();
        TicketRecord {
            ticket_id: self.ticket_id,
            site: self.fields.site,
            isp: self.fields.isp,
            category: self.fields.category,
            subject: self.fields.subject,
            description: self.fields.description,
            status: self.fields.status,
            priority: self.fields.priority,
            normalized_text: self.normalized_text,
            signature: self.signature,
            embedding: self.embedding,
            embedding_model: self.embedding_model,
            embedding_dim: dim,
            first_seen_at: self.seen_at,
            last_seen_at: self.seen_at,
            recurrence_group: None,
            group_similarity: None,
        }
    }

    /// Apply this write on top of an existing record, keeping `first_seen_at`
    /// and the recurrence-group assignment.
    pub fn apply_to(self, existing: &TicketRecord) -> TicketRecord {
        let mut record = self.into_new_record();
        record.first_seen_at = existing.first_seen_at;
        record.recurrence_group = existing.recurrence_group.clone();
        record.group_similarity = existing.group_similarity;
        record
    }
}

/// One result of a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityHit {
    pub ticket_id: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub similarity: f64,
    pub subject: String,
    pub category: String,
    pub site: String,
}

/// Ticket priority as understood by the helpdesk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }

    /// Case-insensitive parse; `None` for anything outside the closed set.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which triage branch produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageSource {
    /// No classifier credential configured.
    Heuristic,
    /// Classifier answered with parseable output.
    Classifier,
    /// Classifier answered, but the output could not be parsed.
    FallbackMalformed,
    /// The classifier call itself failed.
    FallbackError,
}

/// Classification of a single ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageResult {
    pub summary: String,
    /// Always a member of the configured category set.
    pub category: String,
    pub priority: Priority,
    pub priority_reason: String,
    pub draft_reply: String,
    pub confidence: Option<f64>,
    /// Always contains the provenance tag and a `category-<name>` tag.
    pub tags: Vec<String>,
    pub source: TriageSource,
}
