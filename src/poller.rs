//! Poll worker: fetch active tickets, triage, persist, write back.
//!
//! One [`PollWorker`] owns its cycle state ([`PollState`]); nothing is
//! process-global, so independent workers never interfere.
//!
//! # Cycle
//!
//! 1. Ensure the store is ready (first successful cycle only).
//! 2. Clear the intra-cycle handled set.
//! 3. Refresh the helpdesk token.
//! 4. Fetch up to `batch_limit` tickets in the active statuses.
//! 5. For each ticket, in fetch order:
//!    - skip ids already handled this cycle
//!    - skip tickets whose activity time is older than the high-water mark
//!    - triage → upsert → private note → priority → notification
//!    - mark handled once every step succeeded
//! 6. Advance the high-water mark to the cycle's start time.
//!
//! A failure in steps 1, 3 or 4 aborts the cycle and leaves the mark where
//! it was. A failure inside step 5 is logged and only affects that ticket.
//!
//! Every step is bounded by `poller.step_timeout_secs`. A triage step that
//! runs out of time degrades to the `Fallback error` result instead of
//! failing the ticket.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use helpdesk_triage_core::models::{TicketFields, TriageResult, TriageSource};
use helpdesk_triage_core::records::RecordWriter;
use helpdesk_triage_core::store::TicketStore;
use helpdesk_triage_core::triage::{reply_policy, AutoReplySettings, ReplyPolicy, TriageEngine, TriageInput};

use crate::config::{Config, PollerConfig, Secrets};
use crate::embedding::create_provider;
use crate::helpdesk::{AccessToken, Helpdesk, HelpdeskTicket, ZohoDesk};
use crate::notify::{create_notifier, Notifier};
use crate::sqlite_store::SqliteStore;
use crate::triage_cmd::build_triage_engine;

/// Status stored when the helpdesk omits one.
const DEFAULT_STATUS: &str = "Open";

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub statuses: Vec<String>,
    pub batch_limit: usize,
    pub interval: Duration,
    pub step_timeout: Duration,
}

impl From<&PollerConfig> for PollSettings {
    fn from(config: &PollerConfig) -> Self {
        Self {
            statuses: config.active_statuses.clone(),
            batch_limit: config.batch_limit,
            interval: Duration::from_secs(config.interval_secs),
            step_timeout: Duration::from_secs(config.step_timeout_secs),
        }
    }
}

/// In-memory cycle state. Lost on restart.
#[derive(Debug, Default)]
pub struct PollState {
    high_water: Option<DateTime<Utc>>,
    handled: HashSet<String>,
}

impl PollState {
    /// Start time of the last completed cycle.
    pub fn high_water(&self) -> Option<DateTime<Utc>> {
        self.high_water
    }

    /// Ids fully handled in the current (or last) cycle.
    pub fn handled(&self) -> &HashSet<String> {
        &self.handled
    }

    fn is_stale(&self, ticket: &HelpdeskTicket) -> bool {
        match (self.high_water, ticket.activity_time()) {
            (Some(mark), Some(at)) => at < mark,
            _ => false,
        }
    }
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub processed: usize,
    pub skipped_duplicate: usize,
    pub skipped_stale: usize,
    pub failed: usize,
}

/// Collaborators of a [`PollWorker`].
pub struct PollDeps {
    pub helpdesk: Arc<dyn Helpdesk>,
    pub store: Arc<dyn TicketStore>,
    pub records: Arc<RecordWriter>,
    pub triage: Arc<TriageEngine>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct PollWorker {
    deps: PollDeps,
    settings: PollSettings,
    auto_reply: AutoReplySettings,
    state: PollState,
    storage_ready: bool,
}

impl PollWorker {
    pub fn new(deps: PollDeps, settings: PollSettings, auto_reply: AutoReplySettings) -> Self {
        Self {
            deps,
            settings,
            auto_reply,
            state: PollState::default(),
            storage_ready: false,
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// Run cycles on the configured interval until `shutdown` resolves.
    ///
    /// Shutdown is observed between cycles; a running cycle completes.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            interval_secs = self.settings.interval.as_secs(),
            batch_limit = self.settings.batch_limit,
            "poller started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, poller stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %format!("{:#}", e), "cycle aborted");
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle that started at `started`.
    pub async fn run_cycle_at(&mut self, started: DateTime<Utc>) -> Result<CycleReport> {
        if !self.storage_ready {
            self.bounded("store connect", self.deps.store.ensure_ready())
                .await?;
            self.storage_ready = true;
        }

        self.state.handled.clear();

        let token = self
            .bounded("token refresh", self.deps.helpdesk.refresh_token())
            .await?;
        let tickets = self
            .bounded(
                "ticket fetch",
                self.deps.helpdesk.list_active_tickets(
                    &token,
                    &self.settings.statuses,
                    self.settings.batch_limit,
                ),
            )
            .await?;

        let mut report = CycleReport {
            fetched: tickets.len(),
            ..Default::default()
        };
        info!(count = tickets.len(), "fetched active tickets");

        for ticket in &tickets {
            if self.state.handled.contains(&ticket.id) {
                debug!(ticket_id = %ticket.id, "already handled this cycle");
                report.skipped_duplicate += 1;
                continue;
            }
            if self.state.is_stale(ticket) {
                debug!(ticket_id = %ticket.id, "older than high-water mark");
                report.skipped_stale += 1;
                continue;
            }

            match self.process_ticket(&token, ticket).await {
                Ok(result) => {
                    self.state.handled.insert(ticket.id.clone());
                    report.processed += 1;
                    info!(
                        ticket_id = %ticket.id,
                        category = %result.category,
                        priority = %result.priority,
                        "ticket triaged"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    error!(ticket_id = %ticket.id, error = %format!("{:#}", e), "ticket failed");
                }
            }
        }

        self.state.high_water = Some(started);
        info!(
            processed = report.processed,
            failed = report.failed,
            skipped_duplicate = report.skipped_duplicate,
            skipped_stale = report.skipped_stale,
            token_expires_in = token.expires_in,
            "cycle complete"
        );
        Ok(report)
    }

    async fn process_ticket(
        &self,
        token: &AccessToken,
        ticket: &HelpdeskTicket,
    ) -> Result<TriageResult> {
        let input = TriageInput {
            subject: ticket.subject.clone(),
            description: ticket.description.clone(),
            customer_name: ticket.customer_name.clone(),
        };
        let result =
            match tokio::time::timeout(self.settings.step_timeout, self.deps.triage.triage(&input))
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        ticket_id = %ticket.id,
                        timeout_secs = self.settings.step_timeout.as_secs_f64(),
                        "triage timed out, using fallback"
                    );
                    self.deps.triage.fallback(&input, TriageSource::FallbackError)
                }
            };

        let fields = TicketFields {
            site: ticket.site.clone(),
            isp: ticket.isp.clone(),
            category: result.category.clone(),
            subject: ticket.subject.clone(),
            description: ticket.description.clone(),
            status: ticket
                .status
                .clone()
                .unwrap_or_else(|| DEFAULT_STATUS.to_string()),
            priority: result.priority.as_str().to_string(),
        };
        self.bounded("upsert", self.deps.records.upsert(&ticket.id, fields))
            .await?;

        let policy = reply_policy(&result, &self.auto_reply);
        let note = build_note(&result, policy);
        self.bounded(
            "add note",
            self.deps.helpdesk.add_private_note(token, &ticket.id, &note),
        )
        .await?;
        self.bounded(
            "update priority",
            self.deps
                .helpdesk
                .update_priority(token, &ticket.id, result.priority),
        )
        .await?;
        self.bounded(
            "notify",
            self.deps.notifier.notify(&ticket.id, &result, policy),
        )
        .await?;

        Ok(result)
    }

    async fn bounded<T>(&self, step: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.settings.step_timeout, fut).await {
            Ok(result) => result.map_err(|e| e.context(format!("{} failed", step))),
            Err(_) => Err(anyhow!(
                "{} timed out after {}s",
                step,
                self.settings.step_timeout.as_secs()
            )),
        }
    }
}

/// `htriage poll`: wire everything from config and run.
///
/// Missing helpdesk credentials fail here, before any cycle.
pub async fn run_poll(config: &Config, once: bool) -> Result<()> {
    let secrets = Secrets::from_env();
    let credentials = secrets.helpdesk_credentials()?;
    let helpdesk = Arc::new(ZohoDesk::new(&config.helpdesk, credentials)?);

    let store = Arc::new(SqliteStore::new(
        &config.db.path,
        config.similarity.index_enabled,
    ));
    let embedder = create_provider(&config.embedding)?;
    let records = RecordWriter::new(store.clone(), embedder)
        .reuse_by_signature(config.embedding.reuse_by_signature);
    let triage = build_triage_engine(config, &secrets)?;
    let notifier = create_notifier(&config.notify, secrets.mail_relay_token.clone())?;

    let deps = PollDeps {
        helpdesk,
        store: store.clone(),
        records: Arc::new(records),
        triage: Arc::new(triage),
        notifier,
    };
    let mut worker = PollWorker::new(
        deps,
        PollSettings::from(&config.poller),
        config.triage.auto_reply(),
    );

    let outcome = if once {
        worker.run_cycle().await.map(|report| {
            println!(
                "Cycle complete: fetched {}, processed {}, failed {}, skipped {} duplicate / {} stale.",
                report.fetched,
                report.processed,
                report.failed,
                report.skipped_duplicate,
                report.skipped_stale
            );
        })
    } else {
        worker
            .run(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
    };

    store.close().await;
    outcome
}

/// Private note posted back to the helpdesk.
pub fn build_note(result: &TriageResult, policy: ReplyPolicy) -> String {
    let confidence = result
        .confidence
        .map(|c| format!("{:.2}", c))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "Summary: {}\nCategory: {}\nPriority: {} ({})\nConfidence: {}\nTags: {}\n\nDraft reply ({}):\n{}",
        result.summary,
        result.category,
        result.priority,
        result.priority_reason,
        confidence,
        result.tags.join(", "),
        policy.label(),
        result.draft_reply,
    )
}
