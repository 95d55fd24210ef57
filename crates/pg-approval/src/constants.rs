use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::PaymentError;

/// Result code the web (standard pay) flow uses for a successful step.
pub const WEB_SUCCESS_CODE: &str = "0000";

/// Status the mobile (`P_`-prefixed) flow uses for a successful step.
pub const MOBILE_SUCCESS_CODE: &str = "00";

/// Fixed path of the mobile network-cancel endpoint, appended to the
/// validated approval host.
pub const MOBILE_NET_CANCEL_PATH: &str = "/smart/payNetCancel.ini";

/// Character range of the mobile transaction id that holds the merchant id.
pub const MOBILE_MID_OFFSET: std::ops::Range<usize> = 10..20;

/// Sandbox merchant id published by the gateway for integration testing.
pub const TEST_MERCHANT_ID: &str = "INIpayTest";

/// Sign key paired with [`TEST_MERCHANT_ID`].
pub const TEST_SIGN_KEY: &str = "SU5JTElURV9UUklQTEVERVNfS0VZU1RS";

/// Default timeout for the approval call.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the network-cancel call.
pub const DEFAULT_COMPENSATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Data center ids the gateway may put in `idc_name`.
pub const DATA_CENTER_IDS: [&str; 3] = ["fc", "ks", "stg"];

/// Endpoints the merchant expects for one data center.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataCenter {
    pub approval_url: String,
    /// Only the web flow receives a network-cancel URL from the gateway; the
    /// mobile flow derives it from `approval_url`.
    pub compensation_url: Option<String>,
}

/// Runtime gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub merchant_id: String,
    pub sign_key: String,
    pub web_data_centers: BTreeMap<String, DataCenter>,
    pub mobile_data_centers: BTreeMap<String, DataCenter>,
    pub approval_timeout: Duration,
    pub compensation_timeout: Duration,
}

impl Default for GatewayConfig {
    /// Defaults to the sandbox merchant against the production endpoint tables.
    fn default() -> Self {
        let web_data_centers = DATA_CENTER_IDS
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    DataCenter {
                        approval_url: format!("https://{id}stdpay.inicis.com/api/payAuth"),
                        compensation_url: Some(format!(
                            "https://{id}stdpay.inicis.com/api/netCancel"
                        )),
                    },
                )
            })
            .collect();
        let mobile_data_centers = DATA_CENTER_IDS
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    DataCenter {
                        approval_url: format!("https://{id}mobile.inicis.com/smart/payReq.ini"),
                        compensation_url: None,
                    },
                )
            })
            .collect();

        Self {
            merchant_id: TEST_MERCHANT_ID.to_string(),
            sign_key: TEST_SIGN_KEY.to_string(),
            web_data_centers,
            mobile_data_centers,
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
            compensation_timeout: DEFAULT_COMPENSATION_TIMEOUT,
        }
    }
}

/// Parse a data center table override of the form
/// `id=approval_url|compensation_url,id=approval_url`.
pub fn parse_data_centers(raw: &str) -> Result<BTreeMap<String, DataCenter>, PaymentError> {
    let mut table = BTreeMap::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (id, urls) = item.split_once('=').ok_or_else(|| {
            PaymentError::Config(format!("data center entry '{item}' is missing '='"))
        })?;
        let id = id.trim();
        if id.is_empty() {
            return Err(PaymentError::Config(format!(
                "data center entry '{item}' has an empty id"
            )));
        }
        let mut parts = urls.splitn(2, '|').map(str::trim);
        let approval_url = parts
            .next()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| PaymentError::Config(format!("data center '{id}' has no URL")))?;
        let compensation_url = parts.next().filter(|u| !u.is_empty());

        for url in std::iter::once(approval_url).chain(compensation_url) {
            url::Url::parse(url)
                .map_err(|e| PaymentError::Config(format!("invalid URL '{url}': {e}")))?;
        }

        table.insert(
            id.to_string(),
            DataCenter {
                approval_url: approval_url.to_string(),
                compensation_url: compensation_url.map(str::to_string),
            },
        );
    }
    if table.is_empty() {
        return Err(PaymentError::Config(
            "data center table must not be empty".to_string(),
        ));
    }
    Ok(table)
}
