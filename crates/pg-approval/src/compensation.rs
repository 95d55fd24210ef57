use std::sync::Arc;

use chrono::Utc;

use crate::approval::{mobile_merchant_id, web_form, web_timestamp};
use crate::constants::{GatewayConfig, MOBILE_NET_CANCEL_PATH};
use crate::decoder::decode;
use crate::error::{PaymentError, TransportError};
use crate::payment::{AuthorizationResult, Flow};
use crate::response::{CompensationRecord, CompensationResult};
use crate::transport::GatewayTransport;

/// Network-cancel endpoint for a callback whose URLs already passed the
/// allow-list.
///
/// Mobile: origin of the approval URL plus the fixed cancel path. Web: the
/// gateway-supplied `netCancelUrl`.
pub fn compensation_endpoint(auth: &AuthorizationResult) -> Result<String, PaymentError> {
    match auth.flow {
        Flow::Mobile => {
            let approval_url = auth.approval_url.as_deref().ok_or_else(|| {
                PaymentError::Compensation("approval URL missing".to_string())
            })?;
            let parsed = url::Url::parse(approval_url)
                .map_err(|e| PaymentError::Compensation(format!("bad approval URL: {e}")))?;
            if !parsed.has_host() {
                return Err(PaymentError::Compensation(
                    "approval URL has no host".to_string(),
                ));
            }
            Ok(format!(
                "{}{}",
                parsed.origin().ascii_serialization(),
                MOBILE_NET_CANCEL_PATH
            ))
        }
        Flow::Web => auth
            .compensation_url
            .clone()
            .ok_or_else(|| PaymentError::Compensation("netCancelUrl missing".to_string())),
    }
}

/// Voids an authorization whose approval could not be confirmed.
pub struct CompensationClient<T> {
    transport: Arc<T>,
    config: Arc<GatewayConfig>,
}

impl<T: GatewayTransport> CompensationClient<T> {
    pub fn new(transport: Arc<T>, config: Arc<GatewayConfig>) -> Self {
        Self { transport, config }
    }

    /// Issue the network cancel once. Never retried: a failed record is left
    /// for manual reconciliation.
    pub async fn compensate(&self, auth: &AuthorizationResult) -> CompensationRecord {
        let requested_at = Utc::now();
        let (result, reason) = match self.try_compensate(auth).await {
            Ok(()) => {
                tracing::info!(
                    token = %format!("{:.8}", auth.auth_token),
                    order_id = %auth.order_id,
                    "network cancel succeeded"
                );
                (CompensationResult::Succeeded, None)
            }
            Err(e) => {
                tracing::error!(
                    token = %format!("{:.8}", auth.auth_token),
                    order_id = %auth.order_id,
                    amount = ?auth.amount,
                    error = %e,
                    "network cancel failed; manual reconciliation required"
                );
                (CompensationResult::Failed, Some(e.to_string()))
            }
        };

        CompensationRecord {
            auth_token: auth.auth_token.clone(),
            order_id: auth.order_id.clone(),
            amount: auth.amount,
            requested_at,
            result,
            reason,
        }
    }

    async fn try_compensate(&self, auth: &AuthorizationResult) -> Result<(), PaymentError> {
        let endpoint = compensation_endpoint(auth)?;

        let form = match auth.flow {
            Flow::Mobile => {
                let mut form = vec![
                    ("P_TID", auth.auth_token.clone()),
                    ("P_MID", mobile_merchant_id(&auth.auth_token).to_string()),
                    ("P_OID", auth.order_id.clone()),
                ];
                if let Some(amount) = auth.amount {
                    form.push(("P_AMT", amount.to_string()));
                }
                form
            }
            Flow::Web => {
                let mut form = web_form(&self.config, auth, &web_timestamp());
                form.push(("orderNumber", auth.order_id.clone()));
                form
            }
        };

        let resp = self
            .transport
            .post_form(&endpoint, form, self.config.compensation_timeout)
            .await?;
        if !resp.is_success() {
            return Err(TransportError::Status(resp.status).into());
        }

        let fields = decode(&resp.body);
        let status_key = auth.flow.status_field();
        match fields.get(status_key).map(|s| s.trim()) {
            Some(code) if code == auth.flow.success_code() => Ok(()),
            Some(code) => Err(PaymentError::Compensation(format!(
                "gateway refused cancel with {status_key}={code}"
            ))),
            None => Err(PaymentError::Decode(format!(
                "cancel response has no {status_key} field"
            ))),
        }
    }
}
