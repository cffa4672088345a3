//! Triage notification email.
//!
//! The poll worker sends one email per processed ticket. Delivery goes
//! through an HTTP mail relay: `POST relay_url` with JSON
//! `{from, to, subject, html}` and an optional bearer token
//! (`MAIL_RELAY_TOKEN`). When `[notify]` has no recipient or relay URL the
//! notifier only logs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use html_escape::encode_text;
use std::sync::Arc;
use std::time::Duration;

use helpdesk_triage_core::models::TriageResult;
use helpdesk_triage_core::triage::ReplyPolicy;

use crate::config::NotifyConfig;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, ticket_id: &str, result: &TriageResult, policy: ReplyPolicy)
        -> Result<()>;
}

/// Build the notifier described by `[notify]`.
pub fn create_notifier(
    config: &NotifyConfig,
    relay_token: Option<String>,
) -> Result<Arc<dyn Notifier>> {
    match (&config.recipient, &config.relay_url) {
        (Some(to), Some(url)) => Ok(Arc::new(MailRelayNotifier::new(
            config,
            to,
            url,
            relay_token,
        )?)),
        _ => {
            tracing::info!("notify.recipient or notify.relay_url not set, email notifications disabled");
            Ok(Arc::new(DisabledNotifier))
        }
    }
}

pub struct MailRelayNotifier {
    relay_url: String,
    from: String,
    to: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl MailRelayNotifier {
    pub fn new(config: &NotifyConfig, to: &str, relay_url: &str, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            relay_url: relay_url.to_string(),
            from: config.from.clone(),
            to: to.to_string(),
            token,
            client,
        })
    }
}

#[async_trait]
impl Notifier for MailRelayNotifier {
    async fn notify(
        &self,
        ticket_id: &str,
        result: &TriageResult,
        policy: ReplyPolicy,
    ) -> Result<()> {
        let body = serde_json::json!({
            "from": self.from,
            "to": self.to,
            "subject": subject_line(ticket_id, result),
            "html": render_html(ticket_id, result, policy),
        });
        let mut req = self.client.post(&self.relay_url).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let response = req.send().await.context("mail relay request failed")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("mail relay error {}: {}", status, text);
        }
        tracing::debug!(ticket_id, to = %self.to, "notification sent");
        Ok(())
    }
}

/// Logs instead of sending.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn notify(
        &self,
        ticket_id: &str,
        result: &TriageResult,
        _policy: ReplyPolicy,
    ) -> Result<()> {
        tracing::debug!(
            ticket_id,
            category = %result.category,
            priority = %result.priority,
            "notification skipped (disabled)"
        );
        Ok(())
    }
}

pub fn subject_line(ticket_id: &str, result: &TriageResult) -> String {
    format!(
        "[Triage] #{} {} / {}",
        ticket_id, result.category, result.priority
    )
}

/// HTML body. Every interpolated value is escaped.
pub fn render_html(ticket_id: &str, result: &TriageResult, policy: ReplyPolicy) -> String {
    let confidence = result
        .confidence
        .map(|c| format!("{:.2}", c))
        .unwrap_or_else(|| "n/a".to_string());
    let tags = result
        .tags
        .iter()
        .map(|t| format!("<code>{}</code>", encode_text(t)))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "<h3>Ticket #{id} triaged</h3>\n\
         <p><b>Summary:</b> {summary}</p>\n\
         <p><b>Category:</b> {category}</p>\n\
         <p><b>Priority:</b> {priority} ({reason})</p>\n\
         <p><b>Confidence:</b> {confidence}</p>\n\
         <p><b>Tags:</b> {tags}</p>\n\
         <p><b>Draft reply ({policy}):</b></p>\n\
         <blockquote>{draft}</blockquote>\n",
        id = encode_text(ticket_id),
        summary = encode_text(&result.summary),
        category = encode_text(&result.category),
        priority = result.priority,
        reason = encode_text(&result.priority_reason),
        confidence = confidence,
        tags = tags,
        policy = policy.label(),
        draft = encode_text(&result.draft_reply).replace('\n', "<br>"),
    )
}
