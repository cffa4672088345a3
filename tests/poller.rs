//! Poll worker cycles against in-process fakes.

mod common;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{ticket, FakeHelpdesk, HashEmbedder, RecordingNotifier};
use helpdesk_triage::config::Config;
use helpdesk_triage::poller::{PollDeps, PollSettings, PollWorker};
use helpdesk_triage_core::models::Priority;
use helpdesk_triage_core::records::RecordWriter;
use helpdesk_triage_core::store::memory::InMemoryStore;
use helpdesk_triage_core::store::TicketStore;
use helpdesk_triage_core::triage::{Classifier, ReplyPolicy, TriageEngine};

struct Harness {
    desk: Arc<FakeHelpdesk>,
    store: Arc<InMemoryStore>,
    notifier: Arc<RecordingNotifier>,
    worker: PollWorker,
}

fn harness(desk: FakeHelpdesk) -> Harness {
    let cfg = Config::default();
    harness_with(
        desk,
        TriageEngine::new(cfg.triage.categories.clone(), None),
        PollSettings::from(&cfg.poller),
    )
}

fn harness_with(desk: FakeHelpdesk, triage: TriageEngine, settings: PollSettings) -> Harness {
    let cfg = Config::default();
    let desk = Arc::new(desk);
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let records = RecordWriter::new(store.clone(), Arc::new(HashEmbedder::new()));
    let deps = PollDeps {
        helpdesk: desk.clone(),
        store: store.clone(),
        records: Arc::new(records),
        triage: Arc::new(triage),
        notifier: notifier.clone(),
    };
    let worker = PollWorker::new(deps, settings, cfg.triage.auto_reply());
    Harness {
        desk,
        store,
        notifier,
        worker,
    }
}

#[tokio::test]
async fn test_cycle_triages_persists_and_writes_back() {
    let mut h = harness(FakeHelpdesk::with_tickets(vec![
        ticket("101", "Login not working"),
        ticket("102", "Refund for last invoice"),
    ]));
    let started = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    let report = h.worker.run_cycle_at(started).await.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 0);

    let login = h.store.get_record("101").await.unwrap().unwrap();
    assert_eq!(login.category, "Account");
    assert_eq!(login.priority, "Low");
    assert_eq!(login.site, "Plant 4");
    assert_eq!(login.status, "Open");
    assert_eq!(login.embedding.len(), common::DIMS);

    let refund = h.store.get_record("102").await.unwrap().unwrap();
    assert_eq!(refund.category, "Billing");
    assert_eq!(refund.priority, "Medium");

    assert_eq!(h.desk.noted_ids(), vec!["101", "102"]);
    let note = h.desk.note_for("101").unwrap();
    assert!(note.starts_with("Summary: Dana: Login not working\nCategory: Account\nPriority: Low (Heuristic v1)"));
    assert!(note.contains("draft only"));

    let priorities = h.desk.priorities.lock().unwrap().clone();
    assert_eq!(
        priorities,
        vec![
            ("101".to_string(), Priority::Low),
            ("102".to_string(), Priority::Medium)
        ]
    );

    assert_eq!(h.notifier.sent_ids(), vec!["101", "102"]);
    assert!(h
        .notifier
        .sent
        .lock()
        .unwrap()
        .iter()
        .all(|(_, _, p)| *p == ReplyPolicy::DraftOnly));

    assert_eq!(h.worker.state().high_water(), Some(started));
    assert!(h.worker.state().handled().contains("101"));
}

#[tokio::test]
async fn test_duplicate_ids_in_one_fetch_are_processed_once() {
    let mut h = harness(FakeHelpdesk::with_tickets(vec![
        ticket("7", "Shipping delay on order"),
        ticket("7", "Shipping delay on order"),
        ticket("8", "Error 500 on dashboard"),
    ]));

    let report = h.worker.run_cycle().await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped_duplicate, 1);
    assert_eq!(h.desk.noted_ids(), vec!["7", "8"]);
    assert_eq!(h.store.len(), 2);
}

#[tokio::test]
async fn test_stale_tickets_skipped_after_first_cycle() {
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let mut old = ticket("1", "Password reset loop");
    old.created_time = Some(t0 - Duration::hours(2));
    let mut touched = ticket("2", "Feature request: dark mode");
    touched.created_time = Some(t0 - Duration::hours(3));
    touched.modified_time = Some(t0 + Duration::minutes(1));

    let mut h = harness(FakeHelpdesk::with_tickets(vec![old, touched]));

    // No mark yet: everything is processed.
    let first = h.worker.run_cycle_at(t0).await.unwrap();
    assert_eq!(first.processed, 2);
    assert_eq!(first.skipped_stale, 0);

    // Second cycle: only the ticket modified after t0 passes.
    let second = h
        .worker
        .run_cycle_at(t0 + Duration::seconds(20))
        .await
        .unwrap();
    assert_eq!(second.skipped_stale, 1);
    assert_eq!(second.processed, 1);
    assert_eq!(h.desk.noted_ids(), vec!["1", "2", "2"]);
    assert_eq!(
        h.worker.state().high_water(),
        Some(t0 + Duration::seconds(20))
    );
}

#[tokio::test]
async fn test_ticket_failure_is_isolated_and_record_survives() {
    let desk = FakeHelpdesk::with_tickets(vec![
        ticket("1", "Login not working"),
        ticket("2", "Refund for last invoice"),
    ]);
    desk.fail_note_for("1");
    let mut h = harness(desk);
    let started = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    let report = h.worker.run_cycle_at(started).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.processed, 1);

    // Persisted before the failing write-back.
    assert!(h.store.get_record("1").await.unwrap().is_some());
    // Nothing after the failing step ran for ticket 1.
    assert!(!h.desk.priorities.lock().unwrap().iter().any(|(id, _)| id == "1"));
    assert_eq!(h.notifier.sent_ids(), vec!["2"]);

    assert!(!h.worker.state().handled().contains("1"));
    assert!(h.worker.state().handled().contains("2"));
    assert_eq!(h.worker.state().high_water(), Some(started));
}

#[tokio::test]
async fn test_refresh_failure_aborts_cycle_without_advancing() {
    let mut h = harness(FakeHelpdesk::with_tickets(vec![ticket("1", "Login not working")]));
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    h.worker.run_cycle_at(t0).await.unwrap();

    h.desk.fail_refresh.store(true, Ordering::SeqCst);
    let err = h.worker.run_cycle_at(t0 + Duration::seconds(20)).await;
    assert!(err.is_err());
    assert_eq!(h.worker.state().high_water(), Some(t0));

    h.desk.fail_refresh.store(false, Ordering::SeqCst);
    h.desk.fail_list.store(true, Ordering::SeqCst);
    assert!(h.worker.run_cycle_at(t0 + Duration::seconds(40)).await.is_err());
    assert_eq!(h.worker.state().high_water(), Some(t0));
    assert_eq!(h.desk.refreshes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_token_refreshed_every_cycle() {
    let mut h = harness(FakeHelpdesk::with_tickets(Vec::new()));
    for _ in 0..3 {
        let report = h.worker.run_cycle().await.unwrap();
        assert_eq!(report.fetched, 0);
    }
    assert_eq!(h.desk.refreshes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_workers_do_not_share_state() {
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let mut a = harness(FakeHelpdesk::with_tickets(vec![ticket("1", "Login not working")]));
    let b = harness(FakeHelpdesk::with_tickets(vec![ticket("1", "Login not working")]));

    a.worker.run_cycle_at(t0).await.unwrap();
    assert_eq!(a.worker.state().high_water(), Some(t0));
    assert_eq!(b.worker.state().high_water(), None);
    assert!(b.worker.state().handled().is_empty());
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = harness(FakeHelpdesk::with_tickets(vec![ticket("1", "Login not working")]));
    let desk = h.desk.clone();
    let notifier = h.notifier.clone();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    // Stop once the first cycle has notified; the next tick is an interval away.
    let stopper = async move {
        while notifier.sent_ids().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let _ = stop_tx.send(());
    };
    let run = h.worker.run(async {
        let _ = stop_rx.await;
    });

    let (outcome, ()) = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        tokio::join!(run, stopper)
    })
    .await
    .expect("poller kept running after shutdown");
    outcome.unwrap();
    assert_eq!(desk.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(desk.noted_ids(), vec!["1"]);
}

/// Answers long after the poll step timeout.
struct SlowClassifier;

#[async_trait]
impl Classifier for SlowClassifier {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(r#"{"category":"Technical","priority":"High"}"#.to_string())
    }
}

#[tokio::test]
async fn test_slow_classifier_degrades_to_fallback() {
    let cfg = Config::default();
    let mut settings = PollSettings::from(&cfg.poller);
    settings.step_timeout = std::time::Duration::from_millis(50);
    let triage = TriageEngine::new(
        cfg.triage.categories.clone(),
        Some(Arc::new(SlowClassifier)),
    );
    let mut h = harness_with(
        FakeHelpdesk::with_tickets(vec![ticket("31", "Refund for last invoice")]),
        triage,
        settings,
    );

    let report = h.worker.run_cycle().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);

    let record = h.store.get_record("31").await.unwrap().unwrap();
    assert_eq!(record.category, "Billing");
    assert_eq!(record.priority, "Low");
    assert!(h.desk.note_for("31").unwrap().contains("Priority: Low (Fallback error)"));
    assert_eq!(h.notifier.sent_ids(), vec!["31"]);
}
