//! Allow-list validation of gateway-chosen URLs.
//!
//! The approval and cancel URLs reach us through a browser redirect, so they
//! are client-controlled. A forged redirect must never make the server post
//! an auth token to a foreign host: the claimed URL has to equal, byte for
//! byte, the URL configured for the claimed data center.

use std::collections::BTreeMap;

use crate::constants::{DataCenter, GatewayConfig};
use crate::error::ValidationError;
use crate::payment::{AuthorizationResult, Flow};

#[derive(Debug, Clone)]
pub struct AllowList {
    web: BTreeMap<String, DataCenter>,
    mobile: BTreeMap<String, DataCenter>,
}

impl AllowList {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            web: config.web_data_centers.clone(),
            mobile: config.mobile_data_centers.clone(),
        }
    }

    fn data_center(&self, flow: Flow, id: &str) -> Result<&DataCenter, ValidationError> {
        let table = match flow {
            Flow::Web => &self.web,
            Flow::Mobile => &self.mobile,
        };
        table
            .get(id)
            .ok_or_else(|| ValidationError::UnknownDataCenter(id.to_string()))
    }

    /// Check a claimed approval URL against the one configured for `data_center_id`.
    pub fn validate(
        &self,
        flow: Flow,
        data_center_id: &str,
        claimed_approval_url: &str,
    ) -> Result<(), ValidationError> {
        let dc = self.data_center(flow, data_center_id)?;
        if dc.approval_url != claimed_approval_url {
            return Err(ValidationError::UrlMismatch {
                field: "approval URL",
                data_center: data_center_id.to_string(),
            });
        }
        Ok(())
    }

    /// Check a claimed network-cancel URL. Only meaningful for the web flow.
    pub fn validate_compensation(
        &self,
        flow: Flow,
        data_center_id: &str,
        claimed_url: &str,
    ) -> Result<(), ValidationError> {
        let dc = self.data_center(flow, data_center_id)?;
        match &dc.compensation_url {
            Some(expected) if expected == claimed_url => Ok(()),
            _ => Err(ValidationError::UrlMismatch {
                field: "network-cancel URL",
                data_center: data_center_id.to_string(),
            }),
        }
    }

    /// Validate every URL a callback asks us to call.
    pub fn validate_callback(&self, auth: &AuthorizationResult) -> Result<(), ValidationError> {
        let dc_id = auth
            .data_center_id
            .as_deref()
            .ok_or(ValidationError::MissingField("idc_name"))?;
        let approval_url = auth
            .approval_url
            .as_deref()
            .ok_or(ValidationError::MissingField(match auth.flow {
                Flow::Web => "authUrl",
                Flow::Mobile => "P_REQ_URL",
            }))?;
        self.validate(auth.flow, dc_id, approval_url)?;

        if auth.flow == Flow::Web {
            let cancel_url = auth
                .compensation_url
                .as_deref()
                .ok_or(ValidationError::MissingField("netCancelUrl"))?;
            self.validate_compensation(auth.flow, dc_id, cancel_url)?;
        }
        Ok(())
    }
}
