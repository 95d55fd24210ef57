use thiserror::Error;

/// Errors raised while orchestrating a payment.
///
/// Only `Validation`, `Decline` and the generic failure ever reach the
/// customer; the remaining variants are for logs and reconciliation.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("declined: {0}")]
    Decline(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("compensation error: {0}")]
    Compensation(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("invalid callback: {0}")]
    InvalidCallback(String),

    #[error("config error: {0}")]
    Config(String),
}

/// A gateway-supplied URL or data center that did not pass the allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown data center: {0}")]
    UnknownDataCenter(String),

    #[error("{field} does not match the configured URL for data center '{data_center}'")]
    UrlMismatch {
        field: &'static str,
        data_center: String,
    },

    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Failures talking to the gateway. All of them leave the gateway-side
/// state unknown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("client setup failed: {0}")]
    Setup(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("corrupt ledger entry for {auth_token}: {reason}")]
    Corrupt { auth_token: String, reason: String },
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}
