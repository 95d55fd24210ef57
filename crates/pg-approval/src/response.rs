use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payment::{AuthorizationResult, Flow};

/// Message shown for every outcome whose true gateway state is unknown.
pub const GENERIC_FAILURE_MESSAGE: &str = "The payment could not be completed. Please try again.";

/// Message shown when the callback failed validation.
pub const VALIDATION_FAILURE_MESSAGE: &str = "The payment could not be verified.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalStatus {
    Approved,
    Declined,
    Error,
}

/// Normalized result of the approval exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalOutcome {
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_amount: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Every decoded field, kept for audit and compensation payloads.
    #[serde(default)]
    pub raw_fields: BTreeMap<String, String>,
}

impl ApprovalOutcome {
    /// An outcome for a call whose gateway-side effect is unknown.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ApprovalStatus::Error,
            transaction_id: None,
            approved_amount: None,
            payment_method: None,
            result_code: None,
            message: Some(message.into()),
            raw_fields: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompensationResult {
    Succeeded,
    Failed,
}

/// One network-cancel attempt. At most one exists per auth token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationRecord {
    pub auth_token: String,
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    pub requested_at: DateTime<Utc>,
    pub result: CompensationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminalState {
    Approved,
    Declined,
    Compensated,
    CompensationFailed,
}

impl TerminalState {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminalState::Approved => "approved",
            TerminalState::Declined => "declined",
            TerminalState::Compensated => "compensated",
            TerminalState::CompensationFailed => "compensation_failed",
        }
    }

    /// The only three things a caller is ever told.
    pub fn payment_status(self) -> PaymentStatus {
        match self {
            TerminalState::Approved => PaymentStatus::Success,
            TerminalState::Declined => PaymentStatus::Declined,
            TerminalState::Compensated | TerminalState::CompensationFailed => PaymentStatus::Error,
        }
    }
}

impl std::str::FromStr for TerminalState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(TerminalState::Approved),
            "declined" => Ok(TerminalState::Declined),
            "compensated" => Ok(TerminalState::Compensated),
            "compensation_failed" => Ok(TerminalState::CompensationFailed),
            other => Err(format!("unknown terminal state '{other}'")),
        }
    }
}

/// The ledger record for one auth token. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyEntry {
    pub auth_token: String,
    pub order_id: String,
    pub flow: Flow,
    pub terminal_state: TerminalState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ApprovalOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationRecord>,
    /// Customer-facing message, fixed at resolution time.
    pub message: String,
    pub resolved_at: DateTime<Utc>,
}

impl IdempotencyEntry {
    pub fn to_result(&self, replayed: bool) -> PaymentResult {
        PaymentResult {
            status: self.terminal_state.payment_status(),
            order_id: self.order_id.clone(),
            auth_token: self.auth_token.clone(),
            message: self.message.clone(),
            transaction_id: match self.terminal_state {
                TerminalState::Approved => self
                    .outcome
                    .as_ref()
                    .and_then(|o| o.transaction_id.clone()),
                _ => None,
            },
            amount: self
                .outcome
                .as_ref()
                .and_then(|o| o.approved_amount)
                .filter(|_| self.terminal_state == TerminalState::Approved),
            replayed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Success,
    Declined,
    Error,
    /// Another delivery still owns the token; read again later.
    Pending,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Success => "success",
            PaymentStatus::Declined => "declined",
            PaymentStatus::Error => "error",
            PaymentStatus::Pending => "pending",
        }
    }
}

/// What the caller of the coordinator observes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub status: PaymentStatus,
    pub order_id: String,
    pub auth_token: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    /// `true` when this delivery observed an outcome another delivery produced.
    pub replayed: bool,
}

impl PaymentResult {
    fn bare(auth: &AuthorizationResult, status: PaymentStatus, message: &str) -> Self {
        Self {
            status,
            order_id: auth.order_id.clone(),
            auth_token: auth.auth_token.clone(),
            message: message.to_string(),
            transaction_id: None,
            amount: None,
            replayed: false,
        }
    }

    pub fn error(auth: &AuthorizationResult) -> Self {
        Self::bare(auth, PaymentStatus::Error, GENERIC_FAILURE_MESSAGE)
    }

    pub fn rejected(auth: &AuthorizationResult) -> Self {
        Self::bare(auth, PaymentStatus::Declined, VALIDATION_FAILURE_MESSAGE)
    }

    pub fn pending(auth: &AuthorizationResult) -> Self {
        let mut result = Self::bare(
            auth,
            PaymentStatus::Pending,
            "The payment is still being processed.",
        );
        result.replayed = true;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(state: TerminalState) -> IdempotencyEntry {
        IdempotencyEntry {
            auth_token: "tok".to_string(),
            order_id: "ORD-1".to_string(),
            flow: Flow::Mobile,
            terminal_state: state,
            outcome: Some(ApprovalOutcome {
                status: ApprovalStatus::Approved,
                transaction_id: Some("TID-1".to_string()),
                approved_amount: Some(10000),
                payment_method: Some("CARD".to_string()),
                result_code: Some("00".to_string()),
                message: None,
                raw_fields: BTreeMap::new(),
            }),
            compensation: None,
            message: "done".to_string(),
            resolved_at: Utc::now(),
        }
    }

    #[test]
    fn compensation_states_surface_as_generic_error() {
        assert_eq!(
            TerminalState::Compensated.payment_status(),
            PaymentStatus::Error
        );
        assert_eq!(
            TerminalState::CompensationFailed.payment_status(),
            PaymentStatus::Error
        );
    }

    #[test]
    fn transaction_id_only_exposed_when_approved() {
        let approved = entry(TerminalState::Approved).to_result(false);
        assert_eq!(approved.transaction_id.as_deref(), Some("TID-1"));
        assert_eq!(approved.amount, Some(10000));

        let failed = entry(TerminalState::Compensated).to_result(true);
        assert_eq!(failed.status, PaymentStatus::Error);
        assert!(failed.transaction_id.is_none());
        assert!(failed.amount.is_none());
        assert!(failed.replayed);
    }

    #[test]
    fn terminal_state_round_trips_through_str() {
        for state in [
            TerminalState::Approved,
            TerminalState::Declined,
            TerminalState::Compensated,
            TerminalState::CompensationFailed,
        ] {
            assert_eq!(state.as_str().parse::<TerminalState>().unwrap(), state);
        }
        assert!("pending".parse::<TerminalState>().is_err());
    }
}
