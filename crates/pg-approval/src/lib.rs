//! Merchant-side orchestration of the two-phase card payment flow.
//!
//! A payment gateway (PG) authorizes a payment in the customer's browser and
//! then redirects back to the merchant with an authorization token. The
//! merchant must exchange that token for final approval through a
//! gateway-chosen URL, and void the authorization ("network cancel") when the
//! approval outcome cannot be confirmed.
//!
//! # Components
//!
//! - [`validator::AllowList`]: checks gateway-supplied URLs against the configured data centers
//! - [`decoder::decode`]: parses the gateway's `key=value&...` responses
//! - [`approval::ApprovalClient`]: auth token → approval exchange
//! - [`compensation::CompensationClient`]: network cancellation
//! - [`ledger::Ledger`]: at-most-once claim and append-once terminal outcomes per token
//! - [`coordinator::PaymentCoordinator`]: the saga tying the above together
//!
//! # Quick example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pg_approval::{
//!     AuthorizationResult, CoordinatorSettings, Flow, GatewayConfig, InMemoryLedger,
//!     PaymentCoordinator, ReqwestTransport,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let transport = ReqwestTransport::new().unwrap();
//! let coordinator = Arc::new(PaymentCoordinator::new(
//!     transport,
//!     GatewayConfig::default(),
//!     Arc::new(InMemoryLedger::new()),
//!     CoordinatorSettings::default(),
//! ));
//!
//! let fields = [("P_STATUS", "00"), ("P_TID", "INIMX_AUTH..."), ("P_OID", "order-1")];
//! let auth = AuthorizationResult::from_fields(
//!     Flow::Mobile,
//!     fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
//! )
//! .unwrap();
//! let result = coordinator.process(auth).await;
//! println!("{:?}", result.status);
//! # }
//! ```

// Core types
pub mod constants;
pub mod error;
pub mod payment;
pub mod response;

// Protocol pieces
pub mod approval;
pub mod compensation;
pub mod decoder;
pub mod signing;
pub mod validator;

// Orchestration and state
pub mod coordinator;
pub mod ledger;

// HTTP transport
pub mod transport;

// Re-exports
pub use constants::{DataCenter, GatewayConfig};
pub use coordinator::{
    CoordinatorSettings, OutcomeListener, PaymentCoordinator, PaymentStatusView,
};
pub use error::{LedgerError, PaymentError, TransportError, ValidationError};
pub use ledger::{Claim, InMemoryLedger, Ledger, SqliteLedger};
pub use payment::{AuthorizationResult, Flow};
pub use response::*;
pub use transport::{GatewayResponse, GatewayTransport, ReqwestTransport};
