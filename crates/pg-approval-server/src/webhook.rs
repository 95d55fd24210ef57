use std::time::Duration;

use pg_approval::signing::compute_hmac;
use pg_approval::{
    CompensationResult, IdempotencyEntry, OutcomeListener, PaymentStatus, TerminalState,
};
use serde::Serialize;

use crate::metrics;

/// Order-store notification for one resolved payment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentWebhook {
    pub event: &'static str,
    pub order_id: String,
    pub auth_token: String,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    pub timestamp: i64,
}

impl PaymentWebhook {
    pub fn from_entry(entry: &IdempotencyEntry) -> Self {
        let result = entry.to_result(false);
        Self {
            event: event_name(entry.terminal_state),
            order_id: result.order_id,
            auth_token: result.auth_token,
            status: result.status,
            transaction_id: result.transaction_id,
            amount: result.amount,
            timestamp: entry.resolved_at.timestamp(),
        }
    }
}

pub fn event_name(state: TerminalState) -> &'static str {
    match state {
        TerminalState::Approved => "payment.approved",
        TerminalState::Declined => "payment.declined",
        TerminalState::Compensated => "payment.failed",
        TerminalState::CompensationFailed => "payment.compensation_failed",
    }
}

/// Every webhook URL must be HTTPS. Called at startup.
pub fn validate_webhook_urls(urls: &[String]) -> Result<(), String> {
    for raw in urls {
        let parsed = url::Url::parse(raw).map_err(|e| format!("invalid webhook URL {raw}: {e}"))?;
        if parsed.scheme() != "https" {
            return Err(format!("webhook URL {raw} does not use HTTPS"));
        }
        if !parsed.has_host() {
            return Err(format!("webhook URL {raw} has no host"));
        }
    }
    Ok(())
}

/// HTTP client for webhook delivery. Redirects are not followed.
pub fn webhook_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(5))
        .build()
}

/// Fire-and-forget POST to each webhook URL.
/// If `hmac_secret` is provided, includes an `X-Webhook-Signature` HMAC header.
pub fn fire_webhooks(
    client: &reqwest::Client,
    urls: &[String],
    webhook: PaymentWebhook,
    hmac_secret: Option<&[u8]>,
) {
    let body_bytes = match serde_json::to_vec(&webhook) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize webhook payload");
            return;
        }
    };

    for url in urls {
        let client = client.clone();
        let url = url.clone();
        let body = body_bytes.clone();
        let hmac_sig = hmac_secret.map(|secret| compute_hmac(secret, &body));
        let order_id = webhook.order_id.clone();

        tokio::spawn(async move {
            let mut req = client
                .post(&url)
                .header("content-type", "application/json")
                .timeout(Duration::from_secs(5));

            if let Some(ref sig) = hmac_sig {
                req = req.header("X-Webhook-Signature", sig.as_str());
            }

            match req.body(body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(url = %url, order_id = %order_id, "webhook delivered")
                }
                Ok(resp) => tracing::warn!(
                    url = %url,
                    order_id = %order_id,
                    status = %resp.status(),
                    "webhook rejected by order store"
                ),
                Err(e) => tracing::warn!(url = %url, error = %e, "webhook delivery failed"),
            }
        });
    }
}

/// Announces resolved payments to the order store and counts network cancels.
pub struct WebhookNotifier {
    pub client: reqwest::Client,
    pub urls: Vec<String>,
    /// Derived signing key, domain-separated from the shared secret.
    pub hmac_key: Option<Vec<u8>>,
}

impl OutcomeListener for WebhookNotifier {
    fn on_resolved(&self, entry: &IdempotencyEntry) {
        if let Some(record) = &entry.compensation {
            let label = match record.result {
                CompensationResult::Succeeded => "succeeded",
                CompensationResult::Failed => "failed",
            };
            metrics::COMPENSATIONS.with_label_values(&[label]).inc();
        }

        if self.urls.is_empty() {
            return;
        }
        fire_webhooks(
            &self.client,
            &self.urls,
            PaymentWebhook::from_entry(entry),
            self.hmac_key.as_deref(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pg_approval::Flow;

    #[test]
    fn accepts_https_urls() {
        let urls = vec!["https://orders.example.com/hooks/payment".to_string()];
        assert!(validate_webhook_urls(&urls).is_ok());
    }

    #[test]
    fn rejects_cleartext_and_garbage() {
        assert!(validate_webhook_urls(&["http://orders.example.com/hook".to_string()]).is_err());
        assert!(validate_webhook_urls(&["orders.example.com".to_string()]).is_err());
    }

    #[test]
    fn payload_shape() {
        let entry = IdempotencyEntry {
            auth_token: "tok".to_string(),
            order_id: "ORD-7".to_string(),
            flow: Flow::Mobile,
            terminal_state: TerminalState::CompensationFailed,
            outcome: None,
            compensation: None,
            message: "x".to_string(),
            resolved_at: Utc::now(),
        };
        let json = serde_json::to_value(PaymentWebhook::from_entry(&entry)).unwrap();
        assert_eq!(json["event"], "payment.compensation_failed");
        assert_eq!(json["orderId"], "ORD-7");
        assert_eq!(json["authToken"], "tok");
        assert_eq!(json["status"], "error");
        assert!(json.get("transactionId").is_none());
    }
}
