//! HTTP front of the payment approval flow.
//!
//! The gateway redirects the customer's browser (or posts a form) to the
//! return endpoints here. Each delivery is handed to the
//! [`PaymentCoordinator`](pg_approval::PaymentCoordinator), and the outcome is
//! rendered back to the browser and announced to the order store.
//!
//! # Modules
//!
//! - [`routes`]: return endpoints, status polling, health, metrics
//! - [`render`]: JSON, opener-redirect page or `303` for a payment result
//! - [`config`]: environment configuration
//! - [`bootstrap`]: builds the shared [`AppState`](state::AppState)
//! - [`webhook`]: signed order-store notifications
//! - [`metrics`]: Prometheus metrics

pub mod bootstrap;
pub mod config;
pub mod metrics;
pub mod render;
pub mod routes;
pub mod state;
pub mod webhook;
