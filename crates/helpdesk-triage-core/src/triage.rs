//! Ticket triage: classifier call with a fully specified heuristic fallback.
//!
//! [`TriageEngine::triage`] never fails. It picks one of three branches:
//!
//! | Condition | Branch | `priority_reason` |
//! |-----------|--------|-------------------|
//! | no classifier configured | keyword heuristic | `Heuristic v1` |
//! | classifier output not a JSON object | heuristic category, priority Low | `Fallback` |
//! | classifier call failed | heuristic category, priority Low | `Fallback error` |
//! | otherwise | parsed classifier output, clamped | from the classifier |
//!
//! Parsed output is validated here: the category is canonicalised against
//! the configured set (unknown → `Other`), the priority is clamped to
//! `Low` when unrecognised, confidence is clamped into `[0, 1]`, and the
//! provenance and `category-<name>` tags are always present.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Priority, TriageResult, TriageSource};

/// Tag added to every triage result.
pub const PROVENANCE_TAG: &str = "agent-triaged";

/// Category used when nothing else matches.
pub const FALLBACK_CATEGORY: &str = "Other";

const SUMMARY_MAX_CHARS: usize = 200;

/// A language-model backend: prompt in, free text out.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Ticket fields the triage step looks at.
#[derive(Debug, Clone, Default)]
pub struct TriageInput {
    pub subject: String,
    pub description: String,
    pub customer_name: Option<String>,
}

impl TriageInput {
    fn customer_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self.customer_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => default,
        }
    }
}

/// Classifier output that could not be used.
#[derive(Debug, Error)]
pub enum TriageParseError {
    #[error("classifier output is not JSON: {0}")]
    NotJson(#[source] serde_json::Error),
    #[error("classifier output is not a JSON object")]
    NotAnObject,
    #[error("classifier output has wrongly typed fields: {0}")]
    Schema(#[source] serde_json::Error),
}

/// Classifier response schema. Every field is optional; defaults are
/// applied in [`TriageEngine`].
#[derive(Debug, Default, Deserialize)]
pub struct RawTriage {
    pub summary: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub priority_reason: Option<String>,
    pub draft_reply: Option<String>,
    pub confidence: Option<serde_json::Value>,
    pub tags: Option<Vec<String>>,
}

pub struct TriageEngine {
    classifier: Option<Arc<dyn Classifier>>,
    categories: Vec<String>,
}

impl TriageEngine {
    pub fn new(categories: Vec<String>, classifier: Option<Arc<dyn Classifier>>) -> Self {
        Self {
            classifier,
            categories,
        }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    pub async fn triage(&self, input: &TriageInput) -> TriageResult {
        let Some(classifier) = &self.classifier else {
            return self.heuristic(input);
        };

        let prompt = build_prompt(input, &self.categories);
        let text = match classifier.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "classifier call failed, using fallback");
                return self.fallback(input, TriageSource::FallbackError);
            }
        };

        match parse_classifier_output(&text) {
            Ok(raw) => self.from_raw(raw, input),
            Err(e) => {
                warn!(error = %e, "classifier output unusable, using fallback");
                self.fallback(input, TriageSource::FallbackMalformed)
            }
        }
    }

    /// Keyword classification used when no classifier is configured.
    pub fn heuristic(&self, input: &TriageInput) -> TriageResult {
        let category = self.canonical_category(heuristic_category(&input.subject));
        let priority = match category.as_str() {
            "Billing" => Priority::Medium,
            "Technical" => Priority::High,
            _ => Priority::Low,
        };
        let summary = truncate_chars(
            &format!("{}: {}", input.customer_or("Customer"), input.subject),
            SUMMARY_MAX_CHARS,
        );
        let subject = if input.subject.is_empty() {
            "your issue"
        } else {
            input.subject.as_str()
        };
        let draft_reply = format!(
            "Hi {},\n\nThanks for reaching out about \"{}\". Please share any error messages, \
             steps tried, and a screenshot if possible. We\u{2019}re on it.\n\nBest,\nSupport",
            input.customer_or("there"),
            subject
        );
        TriageResult {
            summary,
            tags: default_tags(&category),
            category,
            priority,
            priority_reason: "Heuristic v1".to_string(),
            draft_reply,
            confidence: None,
            source: TriageSource::Heuristic,
        }
    }

    /// Degraded result for a classifier that failed or answered badly.
    /// Callers that give up on a slow classifier use `FallbackError`.
    pub fn fallback(&self, input: &TriageInput, source: TriageSource) -> TriageResult {
        let category = self.canonical_category(heuristic_category(&input.subject));
        let reason = match source {
            TriageSource::FallbackError => "Fallback error",
            _ => "Fallback",
        };
        TriageResult {
            summary: non_empty_or(&input.subject, "Ticket"),
            tags: default_tags(&category),
            category,
            priority: Priority::Low,
            priority_reason: reason.to_string(),
            draft_reply: investigating_reply(input),
            confidence: None,
            source,
        }
    }

    fn from_raw(&self, raw: RawTriage, input: &TriageInput) -> TriageResult {
        let proposed = raw.category.unwrap_or_default();
        let category = self.canonical_category(&proposed);
        if !proposed.eq_ignore_ascii_case(&category) {
            warn!(proposed = %proposed, "classifier category outside configured set, clamped to {}", category);
        }

        let priority = raw
            .priority
            .as_deref()
            .and_then(Priority::parse)
            .unwrap_or(Priority::Low);

        let summary = match raw.summary.filter(|s| !s.trim().is_empty()) {
            Some(s) => truncate_chars(&s, SUMMARY_MAX_CHARS),
            None => non_empty_or(&input.subject, "Ticket"),
        };

        let confidence = raw
            .confidence
            .and_then(|v| v.as_f64())
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0));

        debug!(category = %category, priority = %priority, "classifier triage parsed");

        TriageResult {
            summary,
            tags: merge_tags(raw.tags.unwrap_or_default(), &category),
            category,
            priority,
            priority_reason: raw
                .priority_reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "Classifier".to_string()),
            draft_reply: raw
                .draft_reply
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| investigating_reply(input)),
            confidence,
            source: TriageSource::Classifier,
        }
    }

    /// Map a proposed category onto the configured set, case-insensitively.
    fn canonical_category(&self, proposed: &str) -> String {
        let proposed = proposed.trim();
        self.categories
            .iter()
            .find(|c| c.eq_ignore_ascii_case(proposed))
            .or_else(|| {
                self.categories
                    .iter()
                    .find(|c| c.eq_ignore_ascii_case(FALLBACK_CATEGORY))
            })
            .cloned()
            .unwrap_or_else(|| FALLBACK_CATEGORY.to_string())
    }
}

/// Keyword category for a subject line.
pub fn heuristic_category(subject: &str) -> &'static str {
    let s = subject.to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| s.contains(w));
    if any(&["login", "password"]) {
        "Account"
    } else if any(&["refund", "invoice", "payment"]) {
        "Billing"
    } else if any(&["ship", "delivery", "order"]) {
        "Shipping"
    } else if any(&["error", "bug", "issue", "not working"]) {
        "Technical"
    } else if any(&["price", "quote", "buy"]) {
        "Sales"
    } else {
        FALLBACK_CATEGORY
    }
}

/// The classification prompt sent to the model.
pub fn build_prompt(input: &TriageInput, categories: &[String]) -> String {
    format!(
        "Return strict JSON only with keys:\n\
         summary, category(one of {}), priority(Low|Medium|High), priority_reason,\n\
         draft_reply, confidence(0..1 or null), tags(array like [\"{}\",\"category-<lowercase>\"]).\n\
         Ticket:\n\
         Subject: {}\n\
         Description: {}\n\
         Customer: {}\n",
        categories.join("|"),
        PROVENANCE_TAG,
        input.subject,
        input.description,
        input.customer_or("Customer"),
    )
}

/// Parse classifier text into [`RawTriage`], unwrapping a Markdown code
/// fence if present.
pub fn parse_classifier_output(text: &str) -> Result<RawTriage, TriageParseError> {
    let body = strip_code_fence(text.trim());
    let value: serde_json::Value = serde_json::from_str(body).map_err(TriageParseError::NotJson)?;
    if !value.is_object() {
        return Err(TriageParseError::NotAnObject);
    }
    serde_json::from_value(value).map_err(TriageParseError::Schema)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip an optional language tag on the opening line.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn category_tag(category: &str) -> String {
    format!("category-{}", category.to_lowercase())
}

fn default_tags(category: &str) -> Vec<String> {
    vec![PROVENANCE_TAG.to_string(), category_tag(category)]
}

/// Keep classifier tags, replace any stale `category-*` tag, and make sure
/// the provenance and category tags are present exactly once.
fn merge_tags(tags: Vec<String>, category: &str) -> Vec<String> {
    let mut out = default_tags(category);
    for tag in tags {
        let tag = tag.trim().to_string();
        if tag.is_empty() || tag.starts_with("category-") || out.contains(&tag) {
            continue;
        }
        out.push(tag);
    }
    out
}

fn investigating_reply(input: &TriageInput) -> String {
    format!(
        "Hi {}, thanks for the details. We're investigating and will update you shortly.",
        input.customer_or("there")
    )
}

fn non_empty_or(value: &str, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ============ Reply policy ============

/// Whether a draft reply may be sent without a human in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyPolicy {
    AutoSendEligible,
    DraftOnly,
}

impl ReplyPolicy {
    pub fn label(&self) -> &'static str {
        match self {
            ReplyPolicy::AutoSendEligible => "auto-send eligible",
            ReplyPolicy::DraftOnly => "draft only",
        }
    }
}

/// Settings that decide [`ReplyPolicy`].
#[derive(Debug, Clone)]
pub struct AutoReplySettings {
    pub enabled: bool,
    pub categories: Vec<String>,
    pub confidence_threshold: f64,
}

pub fn reply_policy(result: &TriageResult, settings: &AutoReplySettings) -> ReplyPolicy {
    let category_ok = settings
        .categories
        .iter()
        .any(|c| c.eq_ignore_ascii_case(&result.category));
    let confident = result
        .confidence
        .is_some_and(|c| c >= settings.confidence_threshold);
    if settings.enabled && category_ok && confident {
        ReplyPolicy::AutoSendEligible
    } else {
        ReplyPolicy::DraftOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn categories() -> Vec<String> {
        ["Billing", "Technical", "Account", "Shipping", "Sales", "Other"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn input(subject: &str) -> TriageInput {
        TriageInput {
            subject: subject.to_string(),
            description: "details".to_string(),
            customer_name: Some("Dana".to_string()),
        }
    }

    enum Reply {
        Text(&'static str),
        Fail,
    }

    struct Scripted {
        reply: Reply,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Classifier for Scripted {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.reply {
                Reply::Text(t) => Ok(t.to_string()),
                Reply::Fail => anyhow::bail!("429 rate limited"),
            }
        }
    }

    fn engine(reply: Reply) -> (TriageEngine, Arc<Scripted>) {
        let c = Arc::new(Scripted {
            reply,
            prompts: Mutex::new(Vec::new()),
        });
        (TriageEngine::new(categories(), Some(c.clone())), c)
    }

    #[test]
    fn test_heuristic_keywords() {
        assert_eq!(heuristic_category("Cannot LOGIN"), "Account");
        assert_eq!(heuristic_category("Refund please"), "Billing");
        assert_eq!(heuristic_category("Where is my order"), "Shipping");
        assert_eq!(heuristic_category("App not working"), "Technical");
        assert_eq!(heuristic_category("Quote for 10 seats"), "Sales");
        assert_eq!(heuristic_category("Hello"), "Other");
        // First matching rule wins.
        assert_eq!(heuristic_category("password error"), "Account");
    }

    #[tokio::test]
    async fn test_no_classifier_branch() {
        let engine = TriageEngine::new(categories(), None);
        let r = engine.triage(&input("Login not working")).await;
        assert_eq!(r.category, "Account");
        assert_eq!(r.priority, Priority::Low);
        assert_eq!(r.priority_reason, "Heuristic v1");
        assert_eq!(r.confidence, None);
        assert_eq!(r.tags, vec!["agent-triaged", "category-account"]);
        assert_eq!(r.summary, "Dana: Login not working");
        assert!(r.draft_reply.starts_with("Hi Dana,\n\nThanks for reaching out about \"Login not working\"."));
        assert_eq!(r.source, TriageSource::Heuristic);
    }

    #[tokio::test]
    async fn test_heuristic_priorities_and_defaults() {
        let engine = TriageEngine::new(categories(), None);
        let billing = engine.triage(&input("Invoice wrong")).await;
        assert_eq!(billing.priority, Priority::Medium);
        let tech = engine.triage(&input("Bug in export")).await;
        assert_eq!(tech.priority, Priority::High);

        let anon = engine
            .triage(&TriageInput {
                subject: String::new(),
                ..Default::default()
            })
            .await;
        assert_eq!(anon.summary, "Customer: ");
        assert!(anon.draft_reply.starts_with("Hi there,"));
        assert!(anon.draft_reply.contains("\"your issue\""));
    }

    #[tokio::test]
    async fn test_summary_truncated() {
        let engine = TriageEngine::new(categories(), None);
        let long = "x".repeat(500);
        let r = engine.triage(&input(&long)).await;
        assert_eq!(r.summary.chars().count(), 200);
    }

    #[tokio::test]
    async fn test_malformed_output_falls_back() {
        let (engine, _) = engine(Reply::Text("Sure! Here is the triage you asked for."));
        let r = engine.triage(&input("Refund not received")).await;
        assert_eq!(r.priority_reason, "Fallback");
        assert_eq!(r.confidence, None);
        assert_eq!(r.category, "Billing");
        assert_eq!(r.priority, Priority::Low);
        assert_eq!(r.summary, "Refund not received");
        assert_eq!(r.source, TriageSource::FallbackMalformed);
    }

    #[tokio::test]
    async fn test_empty_answer_is_malformed() {
        let (engine, _) = engine(Reply::Text(""));
        let r = engine.triage(&input("Refund not received")).await;
        assert_eq!(r.priority_reason, "Fallback");
        assert_eq!(r.source, TriageSource::FallbackMalformed);
    }

    #[tokio::test]
    async fn test_call_failure_falls_back() {
        let (engine, _) = engine(Reply::Fail);
        let r = engine.triage(&input("")).await;
        assert_eq!(r.priority_reason, "Fallback error");
        assert_eq!(r.summary, "Ticket");
        assert_eq!(r.category, "Other");
        assert_eq!(
            r.draft_reply,
            "Hi Dana, thanks for the details. We're investigating and will update you shortly."
        );
        assert_eq!(r.source, TriageSource::FallbackError);
    }

    #[tokio::test]
    async fn test_classifier_success_with_fence() {
        let (engine, scripted) = engine(Reply::Text(
            "```json\n{\"summary\":\"Card declined\",\"category\":\"billing\",\"priority\":\"High\",\
             \"priority_reason\":\"Payment blocked\",\"draft_reply\":\"Hi Dana\",\"confidence\":0.93,\
             \"tags\":[\"agent-triaged\",\"category-billing\",\"payments\"]}\n```",
        ));
        let r = engine.triage(&input("Card declined")).await;
        assert_eq!(r.category, "Billing");
        assert_eq!(r.priority, Priority::High);
        assert_eq!(r.priority_reason, "Payment blocked");
        assert_eq!(r.confidence, Some(0.93));
        assert_eq!(r.tags, vec!["agent-triaged", "category-billing", "payments"]);
        assert_eq!(r.source, TriageSource::Classifier);

        let prompts = scripted.prompts.lock().unwrap();
        assert!(prompts[0].contains("category(one of Billing|Technical|Account|Shipping|Sales|Other)"));
        assert!(prompts[0].contains("Subject: Card declined"));
    }

    #[tokio::test]
    async fn test_classifier_output_clamped() {
        let (engine, _) = engine(Reply::Text(
            r#"{"summary":"s","category":"Networking","priority":"urgent","confidence":"very"}"#,
        ));
        let r = engine.triage(&input("VPN")).await;
        assert_eq!(r.category, "Other");
        assert_eq!(r.priority, Priority::Low);
        assert_eq!(r.confidence, None);
        assert_eq!(r.tags, vec!["agent-triaged", "category-other"]);
        assert_eq!(r.priority_reason, "Classifier");
    }

    #[tokio::test]
    async fn test_confidence_clamped_into_range() {
        let (engine, _) = engine(Reply::Text(r#"{"category":"Account","confidence":1.7}"#));
        let r = engine.triage(&input("x")).await;
        assert_eq!(r.confidence, Some(1.0));
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(matches!(
            parse_classifier_output("[1,2]"),
            Err(TriageParseError::NotAnObject)
        ));
        assert!(matches!(
            parse_classifier_output("nope"),
            Err(TriageParseError::NotJson(_))
        ));
        assert!(matches!(
            parse_classifier_output(r#"{"summary": 5}"#),
            Err(TriageParseError::Schema(_))
        ));
    }

    #[test]
    fn test_reply_policy() {
        let settings = AutoReplySettings {
            enabled: true,
            categories: vec!["Account".into(), "Billing".into(), "Shipping".into()],
            confidence_threshold: 0.8,
        };
        let mut r = TriageEngine::new(categories(), None).heuristic(&input("login"));
        assert_eq!(reply_policy(&r, &settings), ReplyPolicy::DraftOnly);

        r.confidence = Some(0.85);
        assert_eq!(reply_policy(&r, &settings), ReplyPolicy::AutoSendEligible);

        r.category = "Technical".into();
        assert_eq!(reply_policy(&r, &settings), ReplyPolicy::DraftOnly);

        r.category = "Account".into();
        let disabled = AutoReplySettings {
            enabled: false,
            ..settings
        };
        assert_eq!(reply_policy(&r, &disabled), ReplyPolicy::DraftOnly);
    }
}
