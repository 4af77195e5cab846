mod ai;
mod auth;
mod automation;
mod config;
mod gmail;
mod labels;
mod models;
mod monitor;
mod pipeline;

use crate::ai::GeminiClassifier;
use crate::automation::AutomationEngine;
use crate::config::Config;
use crate::gmail::GmailClient;
use crate::labels::LabelRegistry;
use crate::models::AutomationRule;
use crate::monitor::Monitor;
use crate::pipeline::Pipeline;
use anyhow::{Context, Result};
use google_gmail1::Gmail;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    if std::env::args().any(|arg| arg == "--reset-token") {
        auth::RingStorage.clear_token().await?;
        println!("Token cleared. Restart without --reset-token to re-authenticate.");
        return Ok(());
    }

    let config = Config::load()?;

    let secret = auth::Authenticator::load_secret("credentials.json").await?;
    let authenticator = auth::Authenticator::authenticate(secret).await?;
    authenticator
        .token(auth::SCOPES)
        .await
        .context("Gmail authentication failed, reconnect the account")?;

    let hub = Gmail::new(
        hyper::Client::builder().build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .expect("Failed to load native roots")
                .https_only()
                .enable_http1()
                .build(),
        ),
        authenticator,
    );
    let mailbox = GmailClient::new(hub);

    let api_key = config.ai.api_key.as_deref().unwrap_or_default();
    let classifier = GeminiClassifier::new(
        &config.ai.base_url,
        &config.ai.model,
        api_key,
        config.ai.timeout_secs,
    )?;

    let mut registry = LabelRegistry::new();
    registry
        .refresh(&mailbox)
        .await
        .context("failed to load labels from Gmail")?;

    let mut engine = AutomationEngine::new();
    engine.set_rules(resolve_automations(&config, &mut registry, &mailbox).await);
    info!(rules = engine.rules().len(), "automations loaded");

    let pipeline = Pipeline::new(
        classifier,
        registry,
        engine,
        config.account.display_name.clone(),
    );

    Monitor::new(mailbox, pipeline, &config.monitor).run().await
}

/// Resolves `[[automations]]` entries to concrete label ids, creating
/// labels that do not exist yet. Entries whose label cannot be resolved are
/// dropped with a warning rather than aborting startup.
async fn resolve_automations(
    config: &Config,
    registry: &mut LabelRegistry,
    mailbox: &GmailClient,
) -> Vec<AutomationRule> {
    let mut rules = Vec::new();
    for (index, entry) in config.automations.iter().enumerate() {
        match registry.ensure(mailbox, &entry.label).await {
            Ok(label) => rules.push(AutomationRule {
                id: format!("auto-{}", index + 1),
                label,
                action: entry.action,
                enabled: entry.enabled,
                template: entry.template.clone(),
            }),
            Err(err) => {
                warn!(label = %entry.label, error = %err, "dropping automation, label unavailable");
            }
        }
    }
    rules
}
