use std::future::Future;
use std::time::Duration;

use crate::error::TransportError;

/// Raw response of a gateway server-to-server call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: String,
}

impl GatewayResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP used by the approval and compensation clients.
///
/// The coordinator only depends on this trait, so tests and alternative
/// HTTP stacks can stand in for [`ReqwestTransport`]. Implementations must
/// not retry: a repeated approval may capture a payment twice.
pub trait GatewayTransport: Send + Sync {
    /// POST `form` as `application/x-www-form-urlencoded` to `url`.
    /// Exceeding `timeout` must surface as [`TransportError::Timeout`].
    fn post_form(
        &self,
        url: &str,
        form: Vec<(&'static str, String)>,
        timeout: Duration,
    ) -> impl Future<Output = Result<GatewayResponse, TransportError>> + Send;
}

impl<T: GatewayTransport> GatewayTransport for std::sync::Arc<T> {
    fn post_form(
        &self,
        url: &str,
        form: Vec<(&'static str, String)>,
        timeout: Duration,
    ) -> impl Future<Output = Result<GatewayResponse, TransportError>> + Send {
        (**self).post_form(url, form, timeout)
    }
}

/// [`GatewayTransport`] backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("pg-approval/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;
        Ok(Self { http })
    }
}

impl GatewayTransport for ReqwestTransport {
    async fn post_form(
        &self,
        url: &str,
        form: Vec<(&'static str, String)>,
        timeout: Duration,
    ) -> Result<GatewayResponse, TransportError> {
        let resp = self
            .http
            .post(url)
            .form(&form)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Body(e.to_string())
            }
        })?;

        Ok(GatewayResponse { status, body })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Request(e.to_string())
    }
}
