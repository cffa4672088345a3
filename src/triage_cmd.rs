//! Triage engine wiring and the `htriage triage` dry run.

use anyhow::Result;
use std::sync::Arc;

use helpdesk_triage_core::triage::{reply_policy, Classifier, TriageEngine, TriageInput};

use crate::classifier::AnthropicClassifier;
use crate::config::{Config, Secrets};

/// Engine with the Anthropic classifier when `ANTHROPIC_API_KEY` is set,
/// heuristic-only otherwise.
pub fn build_triage_engine(config: &Config, secrets: &Secrets) -> Result<TriageEngine> {
    let classifier: Option<Arc<dyn Classifier>> = match &secrets.anthropic_api_key {
        Some(key) => Some(Arc::new(AnthropicClassifier::new(&config.triage, key)?)),
        None => {
            tracing::info!("ANTHROPIC_API_KEY not set, using heuristic triage");
            None
        }
    };
    Ok(TriageEngine::new(config.triage.categories.clone(), classifier))
}

pub async fn run_triage(
    config: &Config,
    subject: &str,
    description: &str,
    customer: Option<String>,
) -> Result<()> {
    let secrets = Secrets::from_env();
    let engine = build_triage_engine(config, &secrets)?;
    let input = TriageInput {
        subject: subject.to_string(),
        description: description.to_string(),
        customer_name: customer,
    };

    let result = engine.triage(&input).await;
    let policy = reply_policy(&result, &config.triage.auto_reply());

    let output = serde_json::json!({
        "result": result,
        "reply_policy": policy.label(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
