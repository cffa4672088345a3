//! In-process fakes shared by the integration tests.
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use helpdesk_triage::helpdesk::{AccessToken, Department, Helpdesk, HelpdeskTicket, NewTicket};
use helpdesk_triage::notify::Notifier;
use helpdesk_triage_core::embedding::EmbeddingProvider;
use helpdesk_triage_core::models::{Priority, TriageResult};
use helpdesk_triage_core::triage::ReplyPolicy;

// ─── Embedding ──────────────────────────────────────────────────────

/// Deterministic bag-of-words embedder: each word bumps one of `DIMS`
/// buckets chosen by an FNV-1a hash.
pub struct HashEmbedder {
    pub calls: AtomicUsize,
}

pub const DIMS: usize = 64;

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn fnv1a(word: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in word.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut v = vec![0f32; DIMS];
        for word in text.split_whitespace() {
            v[(fnv1a(word) % DIMS as u64) as usize] += 1.0;
        }
        Ok(v)
    }
}

// ─── Helpdesk ───────────────────────────────────────────────────────

pub fn ticket(id: &str, subject: &str) -> HelpdeskTicket {
    HelpdeskTicket {
        id: id.to_string(),
        subject: subject.to_string(),
        description: format!("{} details", subject),
        status: Some("Open".to_string()),
        site: "Plant 4".to_string(),
        customer_name: Some("Dana".to_string()),
        ..Default::default()
    }
}

/// Helpdesk that serves a fixed ticket list and records write-backs.
#[derive(Default)]
pub struct FakeHelpdesk {
    pub tickets: Mutex<Vec<HelpdeskTicket>>,
    pub notes: Mutex<Vec<(String, String)>>,
    pub priorities: Mutex<Vec<(String, Priority)>>,
    pub created: Mutex<Vec<NewTicket>>,
    pub refreshes: AtomicUsize,
    pub fail_refresh: AtomicBool,
    pub fail_list: AtomicBool,
    pub fail_note_for: Mutex<HashSet<String>>,
}

impl FakeHelpdesk {
    pub fn with_tickets(tickets: Vec<HelpdeskTicket>) -> Self {
        Self {
            tickets: Mutex::new(tickets),
            ..Default::default()
        }
    }

    pub fn set_tickets(&self, tickets: Vec<HelpdeskTicket>) {
        *self.tickets.lock().unwrap() = tickets;
    }

    pub fn fail_note_for(&self, id: &str) {
        self.fail_note_for.lock().unwrap().insert(id.to_string());
    }

    pub fn noted_ids(&self) -> Vec<String> {
        self.notes.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn note_for(&self, id: &str) -> Option<String> {
        self.notes
            .lock()
            .unwrap()
            .iter()
            .find(|(i, _)| i == id)
            .map(|(_, n)| n.clone())
    }
}

#[async_trait]
impl Helpdesk for FakeHelpdesk {
    async fn refresh_token(&self) -> Result<AccessToken> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            bail!("token refresh failed: HTTP 401");
        }
        Ok(AccessToken {
            token: "fake-token".to_string(),
            expires_in: 3600,
        })
    }

    async fn list_active_tickets(
        &self,
        _token: &AccessToken,
        _statuses: &[String],
        limit: usize,
    ) -> Result<Vec<HelpdeskTicket>> {
        if self.fail_list.load(Ordering::SeqCst) {
            bail!("ticket list failed: HTTP 503");
        }
        let tickets = self.tickets.lock().unwrap();
        Ok(tickets.iter().take(limit).cloned().collect())
    }

    async fn add_private_note(&self, _token: &AccessToken, ticket_id: &str, text: &str) -> Result<()> {
        if self.fail_note_for.lock().unwrap().contains(ticket_id) {
            bail!("add note failed: HTTP 500");
        }
        self.notes
            .lock()
            .unwrap()
            .push((ticket_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn update_priority(
        &self,
        _token: &AccessToken,
        ticket_id: &str,
        priority: Priority,
    ) -> Result<()> {
        self.priorities
            .lock()
            .unwrap()
            .push((ticket_id.to_string(), priority));
        Ok(())
    }

    async fn create_ticket(&self, _token: &AccessToken, ticket: &NewTicket) -> Result<()> {
        self.created.lock().unwrap().push(ticket.clone());
        Ok(())
    }

    async fn list_departments(&self, _token: &AccessToken) -> Result<Vec<Department>> {
        Ok(vec![Department {
            id: "1".to_string(),
            name: "Support".to_string(),
        }])
    }
}

// ─── Notifier ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String, ReplyPolicy)>>,
}

impl RecordingNotifier {
    pub fn sent_ids(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(id, _, _)| id.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, ticket_id: &str, result: &TriageResult, policy: ReplyPolicy) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((ticket_id.to_string(), result.category.clone(), policy));
        Ok(())
    }
}
