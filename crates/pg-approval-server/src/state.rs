use std::sync::Arc;

use pg_approval::{PaymentCoordinator, ReqwestTransport};

/// Shared application state for the approval server.
pub struct AppState {
    pub coordinator: Arc<PaymentCoordinator<ReqwestTransport>>,
    /// Page the customer lands on once the outcome is known.
    pub result_page_url: String,
    /// Separate bearer token for the /metrics endpoint.
    pub metrics_token: Option<Vec<u8>>,
    /// Serve /metrics without a token. Off unless explicitly enabled.
    pub public_metrics: bool,
}
