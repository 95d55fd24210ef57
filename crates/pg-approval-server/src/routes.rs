use std::collections::BTreeMap;

use actix_web::{get, route, web, HttpRequest, HttpResponse};
use pg_approval::signing::constant_time_eq;
use pg_approval::{AuthorizationResult, Flow, PaymentStatusView, GENERIC_FAILURE_MESSAGE};

use crate::metrics;
use crate::render;
use crate::state::AppState;

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    match state.coordinator.health_check() {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "pg-approval-server",
        })),
        Err(e) => {
            tracing::error!(error = %e, "ledger health check failed");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "degraded",
                "service": "pg-approval-server",
                "error": "ledger unavailable",
            }))
        }
    }
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match &state.metrics_token {
        Some(token) => {
            let authorized = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| constant_time_eq(t.as_bytes(), token))
                .unwrap_or(false);

            if !authorized {
                return HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "unauthorized",
                    "message": "Valid Bearer token required for /metrics"
                }));
            }
        }
        None => {
            if !state.public_metrics {
                return HttpResponse::Forbidden().json(serde_json::json!({
                    "error": "forbidden",
                    "message": "Set METRICS_TOKEN or PG_PUBLIC_METRICS=true to access /metrics"
                }));
            }
        }
    }
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::metrics_output())
}

/// Return URL of the web (standard pay) flow.
#[route("/payments/web/return", method = "GET", method = "POST")]
pub async fn web_return(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    handle_callback(Flow::Web, &req, &state, &body).await
}

/// Return URL of the mobile flow.
#[route("/payments/mobile/return", method = "GET", method = "POST")]
pub async fn mobile_return(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    handle_callback(Flow::Mobile, &req, &state, &body).await
}

/// Stored result for a token. Never contacts the gateway.
#[get("/payments/{auth_token}")]
pub async fn payment_status(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    let auth_token = path.into_inner();
    match state.coordinator.status(&auth_token) {
        Ok(PaymentStatusView::Resolved(result)) => HttpResponse::Ok().json(result),
        Ok(PaymentStatusView::InFlight) => {
            HttpResponse::Accepted().json(serde_json::json!({ "status": "pending" }))
        }
        Ok(PaymentStatusView::Unknown) => {
            HttpResponse::NotFound().json(serde_json::json!({ "status": "unknown" }))
        }
        Err(e) => {
            tracing::error!(
                token = %format!("{:.8}", auth_token),
                error = %e,
                "ledger lookup failed"
            );
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "error",
                "message": GENERIC_FAILURE_MESSAGE,
            }))
        }
    }
}

/// Query string and form body merged into one field map. Body values win.
pub fn callback_fields(req: &HttpRequest, body: &[u8]) -> BTreeMap<String, String> {
    let mut fields: BTreeMap<String, String> =
        url::form_urlencoded::parse(req.query_string().as_bytes())
            .into_owned()
            .collect();
    fields.extend(url::form_urlencoded::parse(body).into_owned());
    fields
}

async fn handle_callback(
    flow: Flow,
    req: &HttpRequest,
    state: &AppState,
    body: &[u8],
) -> HttpResponse {
    let auth = match AuthorizationResult::from_fields(flow, callback_fields(req, body)) {
        Ok(auth) => auth,
        Err(e) => {
            metrics::MALFORMED_CALLBACKS
                .with_label_values(&[flow.as_str()])
                .inc();
            tracing::warn!(flow = %flow, error = %e, "malformed gateway callback");
            return HttpResponse::BadRequest().json(serde_json::json!({
                "status": "error",
                "message": GENERIC_FAILURE_MESSAGE,
            }));
        }
    };

    metrics::CALLBACKS.with_label_values(&[flow.as_str()]).inc();
    let start = std::time::Instant::now();

    let result = state.coordinator.process(auth).await;

    let status = result.status.as_str();
    metrics::OUTCOMES
        .with_label_values(&[flow.as_str(), status])
        .inc();
    if result.replayed {
        metrics::REPLAYS.with_label_values(&[flow.as_str()]).inc();
    } else {
        metrics::SAGA_LATENCY
            .with_label_values(&[status])
            .observe(start.elapsed().as_secs_f64());
    }

    render::render(req, flow, &state.result_page_url, &result)
}
