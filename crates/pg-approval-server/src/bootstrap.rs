//! Build the shared server state from a [`ServerConfig`].

use std::sync::Arc;

use pg_approval::signing::compute_hmac;
use pg_approval::{LedgerError, PaymentCoordinator, ReqwestTransport, SqliteLedger, TransportError};

use crate::config::ServerConfig;
use crate::state::AppState;
use crate::webhook::{self, WebhookNotifier};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("invalid {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },

    #[error("ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),

    #[error("gateway client setup failed: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid webhook configuration: {0}")]
    Webhook(String),
}

/// Open the ledger, wire the coordinator and its webhook notifier, and start
/// the claim cleanup task.
///
/// Refuses to start on an in-memory ledger: outcomes would be lost on
/// restart and redelivered callbacks would reach the gateway again.
pub fn bootstrap(config: &ServerConfig) -> Result<Arc<AppState>, BootstrapError> {
    let ledger = SqliteLedger::open(&config.ledger_db_path)?;
    tracing::info!("Ledger: SQLite at {}", config.ledger_db_path);

    if !config.webhook_urls.is_empty() {
        webhook::validate_webhook_urls(&config.webhook_urls).map_err(BootstrapError::Webhook)?;
        tracing::info!("Webhook URLs configured: {}", config.webhook_urls.len());
        if config.webhook_secret.is_none() {
            tracing::warn!("WEBHOOK_SHARED_SECRET not set, webhooks will be unsigned");
        }
    }

    // Domain-separated signing key
    let hmac_key = config
        .webhook_secret
        .as_deref()
        .map(|secret| compute_hmac(secret, b"pg-approval-webhook-hmac").into_bytes());

    let notifier = WebhookNotifier {
        client: webhook::webhook_client()
            .map_err(|e| BootstrapError::Webhook(format!("client setup failed: {e}")))?,
        urls: config.webhook_urls.clone(),
        hmac_key,
    };

    let coordinator = PaymentCoordinator::new(
        ReqwestTransport::new()?,
        config.gateway.clone(),
        Arc::new(ledger),
        config.settings.clone(),
    )
    .with_listener(Arc::new(notifier));
    coordinator.start_claim_cleanup();

    if config.metrics_token.is_none() && config.public_metrics {
        tracing::warn!("METRICS_TOKEN not set and PG_PUBLIC_METRICS=true, /metrics is public");
    }

    Ok(Arc::new(AppState {
        coordinator: Arc::new(coordinator),
        result_page_url: config.result_page_url.clone(),
        metrics_token: config.metrics_token.clone(),
        public_metrics: config.public_metrics,
    }))
}
