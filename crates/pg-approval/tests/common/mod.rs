#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pg_approval::constants::parse_data_centers;
use pg_approval::{
    AuthorizationResult, CoordinatorSettings, Flow, GatewayConfig, GatewayResponse,
    GatewayTransport, Ledger, PaymentCoordinator, TransportError,
};

pub const APPROVAL_URL: &str = "https://pg.example.com/approve";
pub const WEB_APPROVAL_URL: &str = "https://pg.example.com/api/payAuth";
pub const WEB_CANCEL_URL: &str = "https://pg.example.com/api/netCancel";
pub const MOBILE_CANCEL_URL: &str = "https://pg.example.com/smart/payNetCancel.ini";

/// How the fake gateway answers one kind of call.
#[derive(Debug, Clone)]
pub enum Reply {
    Body(&'static str),
    Status(u16),
    /// Sleep past the caller's timeout, then report it.
    Hang,
}

/// One recorded outbound call.
#[derive(Debug, Clone)]
pub struct Call {
    pub url: String,
    pub form: Vec<(&'static str, String)>,
}

impl Call {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// In-process stand-in for the gateway. Cancel calls are told apart from
/// approval calls by their URL.
pub struct FakeGateway {
    approve: Reply,
    cancel: Reply,
    delay: Duration,
    approvals: AtomicUsize,
    cancels: AtomicUsize,
    calls: Mutex<Vec<Call>>,
}

impl FakeGateway {
    pub fn new(approve: Reply, cancel: Reply) -> Arc<Self> {
        Self::with_delay(approve, cancel, Duration::ZERO)
    }

    pub fn with_delay(approve: Reply, cancel: Reply, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            approve,
            cancel,
            delay,
            approvals: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn approvals(&self) -> usize {
        self.approvals.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl GatewayTransport for FakeGateway {
    async fn post_form(
        &self,
        url: &str,
        form: Vec<(&'static str, String)>,
        timeout: Duration,
    ) -> Result<GatewayResponse, TransportError> {
        let is_cancel = url.contains("etCancel");
        let reply = if is_cancel {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            self.cancel.clone()
        } else {
            self.approvals.fetch_add(1, Ordering::SeqCst);
            self.approve.clone()
        };
        self.calls.lock().unwrap().push(Call {
            url: url.to_string(),
            form,
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match reply {
            Reply::Body(body) => Ok(GatewayResponse {
                status: 200,
                body: body.to_string(),
            }),
            Reply::Status(status) => Ok(GatewayResponse {
                status,
                body: String::new(),
            }),
            Reply::Hang => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::Timeout)
            }
        }
    }
}

pub fn gateway_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.mobile_data_centers = parse_data_centers(&format!("fc={APPROVAL_URL}")).unwrap();
    config.web_data_centers =
        parse_data_centers(&format!("fc={WEB_APPROVAL_URL}|{WEB_CANCEL_URL}")).unwrap();
    config.approval_timeout = Duration::from_millis(100);
    config.compensation_timeout = Duration::from_millis(100);
    config
}

pub fn coordinator(
    gateway: &Arc<FakeGateway>,
    ledger: Arc<dyn Ledger>,
    settings: CoordinatorSettings,
) -> Arc<PaymentCoordinator<Arc<FakeGateway>>> {
    Arc::new(PaymentCoordinator::new(
        Arc::clone(gateway),
        gateway_config(),
        ledger,
        settings,
    ))
}

pub fn fast_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        claim_lease: Duration::from_secs(30),
        duplicate_wait: Duration::from_secs(3),
        poll_interval: Duration::from_millis(10),
    }
}

pub fn mobile_callback(token: &str) -> AuthorizationResult {
    AuthorizationResult {
        flow: Flow::Mobile,
        auth_token: token.to_string(),
        order_id: "ORD-1001".to_string(),
        result_code: "00".to_string(),
        result_msg: None,
        approval_url: Some(APPROVAL_URL.to_string()),
        compensation_url: None,
        data_center_id: Some("fc".to_string()),
        merchant_id: None,
        amount: Some(15000),
        merchant_data: None,
    }
}

pub fn web_callback(token: &str) -> AuthorizationResult {
    AuthorizationResult {
        flow: Flow::Web,
        auth_token: token.to_string(),
        order_id: "ORD-2002".to_string(),
        result_code: "0000".to_string(),
        result_msg: None,
        approval_url: Some(WEB_APPROVAL_URL.to_string()),
        compensation_url: Some(WEB_CANCEL_URL.to_string()),
        data_center_id: Some("fc".to_string()),
        merchant_id: Some("INIpayTest".to_string()),
        amount: Some(32000),
        merchant_data: None,
    }
}
