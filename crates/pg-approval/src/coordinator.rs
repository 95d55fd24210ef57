use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::approval::ApprovalClient;
use crate::compensation::CompensationClient;
use crate::constants::GatewayConfig;
use crate::error::LedgerError;
use crate::ledger::{Claim, Ledger};
use crate::payment::AuthorizationResult;
use crate::response::{
    ApprovalOutcome, ApprovalStatus, CompensationRecord, CompensationResult, IdempotencyEntry,
    PaymentResult, TerminalState, GENERIC_FAILURE_MESSAGE,
};
use crate::transport::GatewayTransport;
use crate::validator::AllowList;

/// Timing knobs of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// How long a claim protects a token before another delivery may take it over.
    pub claim_lease: Duration,
    /// How long a duplicate delivery waits for the owner's terminal outcome.
    pub duplicate_wait: Duration,
    /// Ledger polling interval while waiting.
    pub poll_interval: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            claim_lease: Duration::from_secs(120),
            duplicate_wait: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// What the ledger currently knows about a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatusView {
    Resolved(PaymentResult),
    InFlight,
    Unknown,
}

/// Notified once for every terminal outcome this process resolves first.
///
/// Replays never notify. Called from the saga task, so implementations must
/// not block.
pub trait OutcomeListener: Send + Sync {
    fn on_resolved(&self, entry: &IdempotencyEntry);
}

/// Drives one authorization callback to a terminal state.
///
/// ```text
/// Received → Validating → Approving → Approved
///                │            ├──────→ Declined
///                └→ Declined  └──────→ CompensationPending → Compensated
///                                                          → CompensationFailed
/// ```
///
/// Only the delivery that wins the ledger claim talks to the gateway. Every
/// other delivery of the same token replays the stored outcome.
pub struct PaymentCoordinator<T> {
    allow_list: AllowList,
    approval: ApprovalClient<T>,
    compensation: CompensationClient<T>,
    ledger: Arc<dyn Ledger>,
    settings: CoordinatorSettings,
    listener: Option<Arc<dyn OutcomeListener>>,
}

impl<T: GatewayTransport + 'static> PaymentCoordinator<T> {
    pub fn new(
        transport: T,
        config: GatewayConfig,
        ledger: Arc<dyn Ledger>,
        settings: CoordinatorSettings,
    ) -> Self {
        let transport = Arc::new(transport);
        let config = Arc::new(config);
        Self {
            allow_list: AllowList::new(&config),
            approval: ApprovalClient::new(Arc::clone(&transport), Arc::clone(&config)),
            compensation: CompensationClient::new(transport, config),
            ledger,
            settings,
            listener: None,
        }
    }

    /// Attach a listener for first-time terminal outcomes.
    pub fn with_listener(mut self, listener: Arc<dyn OutcomeListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Process one callback delivery.
    ///
    /// Duplicate deliveries wait up to `duplicate_wait` for the owner and
    /// then report [`PaymentStatus::Pending`](crate::PaymentStatus::Pending).
    pub async fn process(self: &Arc<Self>, auth: AuthorizationResult) -> PaymentResult {
        let deadline = tokio::time::Instant::now() + self.settings.duplicate_wait;

        loop {
            match self.ledger.try_claim(&auth.auth_token, self.settings.claim_lease) {
                Ok(Claim::Acquired) => return self.spawn_saga(auth).await,
                Ok(Claim::Resolved(entry)) => {
                    tracing::info!(
                        token = %format!("{:.8}", auth.auth_token),
                        order_id = %entry.order_id,
                        state = entry.terminal_state.as_str(),
                        "duplicate delivery, replaying stored outcome"
                    );
                    return entry.to_result(true);
                }
                Ok(Claim::InFlight) => {
                    if tokio::time::Instant::now() >= deadline {
                        tracing::info!(
                            token = %format!("{:.8}", auth.auth_token),
                            "owner still processing, asking caller to poll"
                        );
                        return PaymentResult::pending(&auth);
                    }
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
                Err(e) => {
                    tracing::error!(
                        token = %format!("{:.8}", auth.auth_token),
                        error = %e,
                        "ledger claim failed, not contacting gateway"
                    );
                    return PaymentResult::error(&auth);
                }
            }
        }
    }

    /// Run the claimed saga on its own task. Dropping the returned future
    /// (e.g. the browser disconnected) does not stop an approval or cancel
    /// call that is already on the wire.
    async fn spawn_saga(self: &Arc<Self>, auth: AuthorizationResult) -> PaymentResult {
        let this = Arc::clone(self);
        let fallback = PaymentResult::error(&auth);
        let token = auth.auth_token.clone();

        match tokio::spawn(async move { this.run_saga(auth).await }).await {
            Ok(result) => result,
            Err(e) => {
                // The claim stays in place until its lease runs out.
                tracing::error!(
                    token = %format!("{:.8}", token),
                    error = %e,
                    "payment saga task aborted"
                );
                fallback
            }
        }
    }

    async fn run_saga(&self, auth: AuthorizationResult) -> PaymentResult {
        let token = format!("{:.8}", auth.auth_token);
        tracing::debug!(token = %token, flow = %auth.flow, "validating callback");

        if let Err(e) = self.allow_list.validate_callback(&auth) {
            tracing::warn!(
                token = %token,
                order_id = %auth.order_id,
                error = %e,
                "callback rejected by allow-list, no gateway call made"
            );
            // Not committed: the genuine callback for this token may still arrive.
            if let Err(e) = self.ledger.release(&auth.auth_token) {
                tracing::warn!(token = %token, error = %e, "failed to release claim");
            }
            return PaymentResult::rejected(&auth);
        }

        if !auth.is_authorized() {
            tracing::info!(
                token = %token,
                order_id = %auth.order_id,
                result_code = %auth.result_code,
                "authorization failed at the gateway, nothing to approve"
            );
            let message = auth
                .result_msg
                .clone()
                .unwrap_or_else(|| "The payment was not authorized.".to_string());
            return self.finish(&auth, TerminalState::Declined, None, None, message);
        }

        tracing::debug!(token = %token, "requesting approval");
        let outcome = self.approval.approve(&auth).await;

        match outcome.status {
            ApprovalStatus::Approved => {
                let message = "The payment was approved.".to_string();
                self.finish(&auth, TerminalState::Approved, Some(outcome), None, message)
            }
            ApprovalStatus::Declined => {
                let message = outcome
                    .message
                    .clone()
                    .unwrap_or_else(|| "The payment was declined.".to_string());
                self.finish(&auth, TerminalState::Declined, Some(outcome), None, message)
            }
            ApprovalStatus::Error => self.compensate(&auth, outcome).await,
        }
    }

    /// CompensationPending: the gateway may have captured the payment, so
    /// void it before recording anything.
    async fn compensate(&self, auth: &AuthorizationResult, outcome: ApprovalOutcome) -> PaymentResult {
        let token = format!("{:.8}", auth.auth_token);

        match self.ledger.lookup(&auth.auth_token) {
            Ok(Some(entry)) => {
                tracing::warn!(
                    token = %token,
                    state = entry.terminal_state.as_str(),
                    "token resolved while approving, skipping network cancel"
                );
                return entry.to_result(true);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(token = %token, error = %e, "ledger lookup failed before cancel");
            }
        }

        tracing::info!(
            token = %token,
            order_id = %auth.order_id,
            "approval unconfirmed, issuing network cancel"
        );
        let record = self.compensation.compensate(auth).await;
        let state = match record.result {
            CompensationResult::Succeeded => TerminalState::Compensated,
            CompensationResult::Failed => TerminalState::CompensationFailed,
        };

        self.finish(
            auth,
            state,
            Some(outcome),
            Some(record),
            GENERIC_FAILURE_MESSAGE.to_string(),
        )
    }

    /// Commit the terminal entry. The stored entry wins if one already exists.
    fn finish(
        &self,
        auth: &AuthorizationResult,
        state: TerminalState,
        outcome: Option<ApprovalOutcome>,
        compensation: Option<CompensationRecord>,
        message: String,
    ) -> PaymentResult {
        let entry = IdempotencyEntry {
            auth_token: auth.auth_token.clone(),
            order_id: auth.order_id.clone(),
            flow: auth.flow,
            terminal_state: state,
            outcome,
            compensation,
            message,
            resolved_at: Utc::now(),
        };

        match self.ledger.commit(entry.clone()) {
            Ok(stored) => {
                tracing::info!(
                    token = %format!("{:.8}", stored.auth_token),
                    order_id = %stored.order_id,
                    state = stored.terminal_state.as_str(),
                    "payment resolved"
                );
                let replayed = stored != entry;
                if !replayed {
                    self.notify(&stored);
                }
                stored.to_result(replayed)
            }
            Err(e) => {
                // The gateway-side effect already happened; surface it anyway.
                tracing::error!(
                    token = %format!("{:.8}", entry.auth_token),
                    order_id = %entry.order_id,
                    state = entry.terminal_state.as_str(),
                    error = %e,
                    "failed to record terminal outcome, manual reconciliation required"
                );
                self.notify(&entry);
                entry.to_result(false)
            }
        }
    }

    fn notify(&self, entry: &IdempotencyEntry) {
        if let Some(listener) = &self.listener {
            listener.on_resolved(entry);
        }
    }

    /// Read-only view for pollers. Never contacts the gateway.
    pub fn status(&self, auth_token: &str) -> Result<PaymentStatusView, LedgerError> {
        if let Some(entry) = self.ledger.lookup(auth_token)? {
            return Ok(PaymentStatusView::Resolved(entry.to_result(true)));
        }
        if self.ledger.is_claimed(auth_token, self.settings.claim_lease)? {
            return Ok(PaymentStatusView::InFlight);
        }
        Ok(PaymentStatusView::Unknown)
    }

    pub fn health_check(&self) -> Result<(), LedgerError> {
        self.ledger.health_check()
    }

    /// Start a background task that purges claims older than the lease every 60 seconds.
    pub fn start_claim_cleanup(&self) {
        let ledger = Arc::clone(&self.ledger);
        let max_age = self.settings.claim_lease;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let purged = ledger.purge_stale_claims(max_age);
                if purged > 0 {
                    tracing::info!(purged, "purged stale payment claims");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::ledger::InMemoryLedger;
    use crate::payment::Flow;
    use crate::response::PaymentStatus;
    use crate::transport::GatewayResponse;
    use std::sync::Mutex;

    /// Transport returning a fixed reply and recording every call.
    struct StubTransport {
        reply: Result<GatewayResponse, TransportError>,
        calls: Mutex<Vec<String>>,
    }

    impl StubTransport {
        fn replying(body: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(GatewayResponse {
                    status: 200,
                    body: body.to_string(),
                }),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl GatewayTransport for StubTransport {
        async fn post_form(
            &self,
            url: &str,
            _form: Vec<(&'static str, String)>,
            _timeout: Duration,
        ) -> Result<GatewayResponse, TransportError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.reply.clone()
        }
    }

    fn coordinator(transport: &Arc<StubTransport>) -> Arc<PaymentCoordinator<Arc<StubTransport>>> {
        Arc::new(PaymentCoordinator::new(
            Arc::clone(transport),
            GatewayConfig::default(),
            Arc::new(InMemoryLedger::new()),
            CoordinatorSettings::default(),
        ))
    }

    fn mobile_auth(status: &str) -> AuthorizationResult {
        AuthorizationResult {
            flow: Flow::Mobile,
            auth_token: "INIMX_AUTHINIpayTest20240101".to_string(),
            order_id: "ORD-1".to_string(),
            result_code: status.to_string(),
            result_msg: Some("user cancelled".to_string()),
            approval_url: Some("https://fcmobile.inicis.com/smart/payReq.ini".to_string()),
            compensation_url: None,
            data_center_id: Some("fc".to_string()),
            merchant_id: None,
            amount: Some(10000),
            merchant_data: None,
        }
    }

    #[tokio::test]
    async fn cancelled_authorization_is_declined_without_gateway_call() {
        let stub = StubTransport::replying("P_STATUS=00");
        let c = coordinator(&stub);
        let result = c.process(mobile_auth("01")).await;
        assert_eq!(result.status, PaymentStatus::Declined);
        assert_eq!(result.message, "user cancelled");
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn rejected_callback_releases_the_token() {
        let stub = StubTransport::replying("P_STATUS=00");
        let c = coordinator(&stub);
        let mut forged = mobile_auth("00");
        forged.approval_url = Some("https://evil.example.com/smart/payReq.ini".to_string());

        let result = c.process(forged).await;
        assert_eq!(result.status, PaymentStatus::Declined);
        assert_eq!(c.status(&result.auth_token).unwrap(), PaymentStatusView::Unknown);

        let genuine = c.process(mobile_auth("00")).await;
        assert_eq!(genuine.status, PaymentStatus::Success);
        assert_eq!(stub.calls(), 1);
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<TerminalState>>);

    impl OutcomeListener for Recorder {
        fn on_resolved(&self, entry: &IdempotencyEntry) {
            self.0.lock().unwrap().push(entry.terminal_state);
        }
    }

    #[tokio::test]
    async fn listener_hears_first_resolution_only() {
        let stub = StubTransport::replying("P_STATUS=00&P_TID=T-1");
        let recorder = Arc::new(Recorder::default());
        let c = Arc::new(
            PaymentCoordinator::new(
                Arc::clone(&stub),
                GatewayConfig::default(),
                Arc::new(InMemoryLedger::new()),
                CoordinatorSettings::default(),
            )
            .with_listener(recorder.clone()),
        );

        c.process(mobile_auth("00")).await;
        c.process(mobile_auth("00")).await;

        let mut forged = mobile_auth("00");
        forged.auth_token = "other-token".to_string();
        forged.data_center_id = Some("zz".to_string());
        c.process(forged).await;

        assert_eq!(*recorder.0.lock().unwrap(), vec![TerminalState::Approved]);
    }

    #[tokio::test]
    async fn status_reports_resolved_entries() {
        let stub = StubTransport::replying("P_STATUS=00&P_TID=T-1");
        let c = coordinator(&stub);
        let result = c.process(mobile_auth("00")).await;
        match c.status(&result.auth_token).unwrap() {
            PaymentStatusView::Resolved(stored) => {
                assert_eq!(stored.status, PaymentStatus::Success);
                assert_eq!(stored.transaction_id.as_deref(), Some("T-1"));
                assert!(stored.replayed);
            }
            other => panic!("expected resolved, got {other:?}"),
        }
        assert_eq!(c.status("never-seen").unwrap(), PaymentStatusView::Unknown);
    }
}
