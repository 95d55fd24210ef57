use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{MOBILE_SUCCESS_CODE, WEB_SUCCESS_CODE};
use crate::error::PaymentError;

/// Which callback protocol the gateway used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    /// Desktop standard-pay flow (`resultCode`, `authToken`, `authUrl`, ...).
    Web,
    /// Legacy mobile flow (`P_STATUS`, `P_TID`, `P_REQ_URL`, ...).
    Mobile,
}

impl Flow {
    /// Code the gateway uses for "this step succeeded".
    pub fn success_code(self) -> &'static str {
        match self {
            Flow::Web => WEB_SUCCESS_CODE,
            Flow::Mobile => MOBILE_SUCCESS_CODE,
        }
    }

    /// Field holding the status in approval and cancel responses.
    pub fn status_field(self) -> &'static str {
        match self {
            Flow::Web => "resultCode",
            Flow::Mobile => "P_STATUS",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Flow::Web => "web",
            Flow::Mobile => "mobile",
        }
    }
}

impl std::fmt::Display for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authorization callback the gateway delivers through the browser.
///
/// Built once per delivery and never mutated. Every URL in here is
/// client-influenced and must pass the allow-list before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationResult {
    pub flow: Flow,
    pub auth_token: String,
    pub order_id: String,
    pub result_code: String,
    pub result_msg: Option<String>,
    pub approval_url: Option<String>,
    pub compensation_url: Option<String>,
    pub data_center_id: Option<String>,
    pub merchant_id: Option<String>,
    pub amount: Option<u64>,
    pub merchant_data: Option<String>,
}

impl AuthorizationResult {
    /// Build from the raw callback fields (query string and form body merged).
    ///
    /// Only the token and the order id are mandatory; everything else is
    /// checked later by the coordinator so that a bad callback still gets a
    /// proper decline.
    pub fn from_fields(
        flow: Flow,
        mut fields: BTreeMap<String, String>,
    ) -> Result<Self, PaymentError> {
        let mut take = |name: &str| {
            fields
                .remove(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let auth = match flow {
            Flow::Web => {
                let amount_raw = take("price");
                AuthorizationResult {
                    flow,
                    auth_token: take("authToken").ok_or_else(|| missing("authToken"))?,
                    order_id: take("orderNumber").ok_or_else(|| missing("orderNumber"))?,
                    result_code: take("resultCode").unwrap_or_default(),
                    result_msg: take("resultMsg"),
                    approval_url: take("authUrl"),
                    compensation_url: take("netCancelUrl"),
                    data_center_id: take("idc_name"),
                    merchant_id: take("mid"),
                    amount: parse_amount(amount_raw.as_deref()),
                    merchant_data: take("merchantData"),
                }
            }
            Flow::Mobile => {
                let amount_raw = take("P_AMT");
                AuthorizationResult {
                    flow,
                    auth_token: take("P_TID").ok_or_else(|| missing("P_TID"))?,
                    order_id: take("P_OID").ok_or_else(|| missing("P_OID"))?,
                    result_code: take("P_STATUS").unwrap_or_default(),
                    result_msg: take("P_RMESG1"),
                    approval_url: take("P_REQ_URL"),
                    compensation_url: None,
                    data_center_id: take("idc_name"),
                    merchant_id: take("P_MID"),
                    amount: parse_amount(amount_raw.as_deref()),
                    merchant_data: take("P_NOTI"),
                }
            }
        };
        Ok(auth)
    }

    /// Whether the gateway reported the first (user-facing) phase as successful.
    pub fn is_authorized(&self) -> bool {
        self.result_code == self.flow.success_code()
    }
}

fn missing(field: &str) -> PaymentError {
    PaymentError::InvalidCallback(format!("missing {field}"))
}

fn parse_amount(raw: Option<&str>) -> Option<u64> {
    let raw = raw?;
    match raw.parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(amount = %raw, "ignoring unparseable callback amount");
            None
        }
    }
}
