use std::collections::BTreeMap;
use std::sync::Arc;

use crate::constants::{GatewayConfig, MOBILE_MID_OFFSET};
use crate::decoder::decode;
use crate::error::{PaymentError, TransportError};
use crate::payment::{AuthorizationResult, Flow};
use crate::response::{ApprovalOutcome, ApprovalStatus};
use crate::signing::{web_signature, web_verification};
use crate::transport::GatewayTransport;

/// Merchant id embedded in a mobile transaction id.
///
/// The gateway places the merchant id at a fixed character offset of
/// `P_TID`. The range is clamped to the token, so short or malformed tokens
/// give a shorter (possibly empty) id instead of panicking.
pub fn mobile_merchant_id(auth_token: &str) -> &str {
    let start = byte_offset(auth_token, MOBILE_MID_OFFSET.start);
    let end = byte_offset(auth_token, MOBILE_MID_OFFSET.end);
    &auth_token[start..end]
}

fn byte_offset(s: &str, char_index: usize) -> usize {
    s.char_indices()
        .nth(char_index)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Millisecond timestamp the web flow signs with.
pub(crate) fn web_timestamp() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

/// Form fields shared by the web approval and cancel calls.
pub(crate) fn web_form(
    config: &GatewayConfig,
    auth: &AuthorizationResult,
    timestamp: &str,
) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("mid", config.merchant_id.clone()),
        ("authToken", auth.auth_token.clone()),
        ("timestamp", timestamp.to_string()),
        ("signature", web_signature(&auth.auth_token, timestamp)),
        (
            "verification",
            web_verification(&auth.auth_token, &config.sign_key, timestamp),
        ),
        ("charset", "UTF-8".to_string()),
        ("format", "NVP".to_string()),
    ];
    if let Some(amount) = auth.amount {
        form.push(("price", amount.to_string()));
    }
    form
}

/// Second-phase client: trades an auth token for final approval.
pub struct ApprovalClient<T> {
    transport: Arc<T>,
    config: Arc<GatewayConfig>,
}

impl<T: GatewayTransport> ApprovalClient<T> {
    pub fn new(transport: Arc<T>, config: Arc<GatewayConfig>) -> Self {
        Self { transport, config }
    }

    /// Run the approval exchange.
    ///
    /// The URL in `auth` must already have passed the allow-list. Exactly one
    /// POST is made; any failure becomes an [`ApprovalStatus::Error`] outcome.
    pub async fn approve(&self, auth: &AuthorizationResult) -> ApprovalOutcome {
        match self.try_approve(auth).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    token = %format!("{:.8}", auth.auth_token),
                    order_id = %auth.order_id,
                    error = %e,
                    "approval outcome unknown"
                );
                ApprovalOutcome::error(e.to_string())
            }
        }
    }

    async fn try_approve(&self, auth: &AuthorizationResult) -> Result<ApprovalOutcome, PaymentError> {
        let url = auth.approval_url.as_deref().ok_or_else(|| {
            PaymentError::InvalidCallback("approval URL missing".to_string())
        })?;

        let form = match auth.flow {
            Flow::Mobile => vec![
                ("P_TID", auth.auth_token.clone()),
                ("P_MID", mobile_merchant_id(&auth.auth_token).to_string()),
            ],
            Flow::Web => web_form(&self.config, auth, &web_timestamp()),
        };

        tracing::debug!(
            token = %format!("{:.8}", auth.auth_token),
            flow = %auth.flow,
            "requesting approval"
        );

        let resp = self
            .transport
            .post_form(url, form, self.config.approval_timeout)
            .await?;
        if !resp.is_success() {
            return Err(TransportError::Status(resp.status).into());
        }

        interpret(auth.flow, decode(&resp.body))
    }
}

/// Turn decoded approval fields into an outcome.
///
/// Approved only when the status field equals the success sentinel. A
/// missing status field is a decode failure: the gateway may well have
/// captured the payment.
pub fn interpret(
    flow: Flow,
    fields: BTreeMap<String, String>,
) -> Result<ApprovalOutcome, PaymentError> {
    let (status_key, msg_key, tid_key, amount_key, method_key) = match flow {
        Flow::Web => ("resultCode", "resultMsg", "tid", "TotPrice", "payMethod"),
        Flow::Mobile => ("P_STATUS", "P_RMESG1", "P_TID", "P_AMT", "P_TYPE"),
    };

    let code = fields
        .get(status_key)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            PaymentError::Decode(format!("approval response has no {status_key} field"))
        })?;

    let status = if code == flow.success_code() {
        ApprovalStatus::Approved
    } else {
        ApprovalStatus::Declined
    };
    let non_empty = |key: &str| fields.get(key).filter(|v| !v.is_empty()).cloned();

    Ok(ApprovalOutcome {
        status,
        transaction_id: non_empty(tid_key),
        approved_amount: non_empty(amount_key).and_then(|a| a.trim().parse().ok()),
        payment_method: non_empty(method_key),
        result_code: Some(code),
        message: non_empty(msg_key),
        raw_fields: fields,
    })
}
