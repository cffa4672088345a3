//! Record writer: derive normalized text, signature and embedding, then
//! upsert through a [`TicketStore`].
//!
//! The writer is the only code path that produces [`RecordWrite`]s, which
//! keeps the derived fields consistent with `subject` + `description`.
//!
//! When `reuse_by_signature` is on and the stored record for the same id
//! already has the same signature and a non-empty embedding, that vector is
//! reused instead of calling the embedding provider again.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::embedding::{embed_text, EmbeddingProvider};
use crate::models::{RecordWrite, TicketFields, TicketRecord};
use crate::normalize::{normalize_text, signature_of};
use crate::store::TicketStore;

pub struct RecordWriter {
    store: Arc<dyn TicketStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    reuse_by_signature: bool,
}

impl RecordWriter {
    pub fn new(store: Arc<dyn TicketStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            reuse_by_signature: true,
        }
    }

    pub fn reuse_by_signature(mut self, enabled: bool) -> Self {
        self.reuse_by_signature = enabled;
        self
    }

    /// Upsert `ticket_id` with `fields`, stamped with the current time.
    pub async fn upsert(&self, ticket_id: &str, fields: TicketFields) -> Result<TicketRecord> {
        self.upsert_at(ticket_id, fields, Utc::now()).await
    }

    /// Upsert with an explicit `seen_at` timestamp.
    pub async fn upsert_at(
        &self,
        ticket_id: &str,
        fields: TicketFields,
        seen_at: DateTime<Utc>,
    ) -> Result<TicketRecord> {
        let normalized_text = normalize_text(&fields.subject, &fields.description);
        let signature = signature_of(&normalized_text);

        let embedding = match self.reusable_embedding(ticket_id, &signature).await? {
            Some(existing) => {
                debug!(ticket_id, "signature unchanged, reusing stored embedding");
                existing
            }
            None => embed_text(self.embedder.as_ref(), &normalized_text)
                .await
                .with_context(|| format!("embedding ticket {}", ticket_id))?,
        };

        let write = RecordWrite {
            ticket_id: ticket_id.to_string(),
            fields,
            normalized_text,
            signature,
            embedding,
            embedding_model: self.embedder.model_name().to_string(),
            seen_at,
        };

        self.store
            .upsert_record(&write)
            .await
            .with_context(|| format!("upserting ticket {}", ticket_id))
    }

    async fn reusable_embedding(&self, ticket_id: &str, signature: &str) -> Result<Option<Vec<f32>>> {
        if !self.reuse_by_signature {
            return Ok(None);
        }
        let existing = self
            .store
            .get_record(ticket_id)
            .await
            .with_context(|| format!("reading ticket {}", ticket_id))?;
        Ok(existing
            .filter(|r| {
                r.signature == signature
                    && !r.embedding.is_empty()
                    && r.embedding_model == self.embedder.model_name()
            })
            .map(|r| r.embedding))
    }
}
