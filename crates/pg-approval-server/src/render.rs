//! Turn a [`PaymentResult`] into what the customer's browser receives.
//!
//! JSON when the request asks for it. Otherwise the web flow (a popup or
//! iframe opened by the checkout page) gets a small page that moves its
//! opener to the result page and closes itself, and the mobile flow (a
//! full-page redirect) gets a `303 See Other`.

use actix_web::http::header::{self, HeaderValue};
use actix_web::{HttpRequest, HttpResponse};
use pg_approval::{Flow, PaymentResult, PaymentStatus};

pub fn wants_json(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("application/json"))
        .unwrap_or(false)
}

/// Result page URL carrying `orderId`, `status` and `message`.
pub fn result_location(result_page_url: &str, result: &PaymentResult) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("orderId", &result.order_id)
        .append_pair("status", result.status.as_str())
        .append_pair("message", &result.message)
        .finish();
    let separator = if result_page_url.contains('?') { '&' } else { '?' };
    format!("{result_page_url}{separator}{query}")
}

pub fn render(
    req: &HttpRequest,
    flow: Flow,
    result_page_url: &str,
    result: &PaymentResult,
) -> HttpResponse {
    if wants_json(req) {
        let mut resp = match result.status {
            PaymentStatus::Pending => HttpResponse::Accepted(),
            _ => HttpResponse::Ok(),
        };
        return resp.json(result);
    }

    let location = result_location(result_page_url, result);
    match flow {
        Flow::Mobile => HttpResponse::SeeOther()
            .insert_header((header::LOCATION, location))
            .insert_header((header::CACHE_CONTROL, HeaderValue::from_static("no-store")))
            .finish(),
        Flow::Web => HttpResponse::Ok()
            .content_type("text/html; charset=utf-8")
            .insert_header((header::CACHE_CONTROL, HeaderValue::from_static("no-store")))
            .body(opener_redirect_page(&location)),
    }
}

fn opener_redirect_page(location: &str) -> String {
    // JSON string literal, with `</` broken up so it cannot close the script.
    let target = serde_json::to_string(location)
        .unwrap_or_else(|_| "\"/\"".to_string())
        .replace("</", "<\\/");
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Payment</title></head>
<body>
<script>
var target = {target};
if (window.opener && !window.opener.closed) {{
  window.opener.location.href = target;
  window.close();
}} else {{
  window.location.replace(target);
}}
</script>
</body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn result(status: PaymentStatus, message: &str) -> PaymentResult {
        PaymentResult {
            status,
            order_id: "ORD 1".to_string(),
            auth_token: "tok".to_string(),
            message: message.to_string(),
            transaction_id: None,
            amount: None,
            replayed: false,
        }
    }

    #[test]
    fn location_is_query_encoded() {
        let loc = result_location("/checkout/result", &result(PaymentStatus::Declined, "a&b=c"));
        assert_eq!(
            loc,
            "/checkout/result?orderId=ORD+1&status=declined&message=a%26b%3Dc"
        );
    }

    #[test]
    fn location_appends_to_existing_query() {
        let loc = result_location(
            "https://shop.example.com/result?lang=ko",
            &result(PaymentStatus::Success, "ok"),
        );
        assert!(loc.starts_with("https://shop.example.com/result?lang=ko&orderId="));
    }

    #[test]
    fn page_cannot_break_out_of_script() {
        let page = opener_redirect_page("/r?message=</script><script>alert(1)</script>");
        assert!(!page.contains("</script><script>"));
        assert!(page.contains("window.opener"));
    }

    #[test]
    fn mobile_redirects_with_see_other() {
        let req = TestRequest::default().to_http_request();
        let resp = render(&req, Flow::Mobile, "/r", &result(PaymentStatus::Error, "x"));
        assert_eq!(resp.status(), 303);
        let location = resp.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert!(location.contains("status=error"));
    }

    #[test]
    fn json_when_asked() {
        let req = TestRequest::default()
            .insert_header((header::ACCEPT, "application/json"))
            .to_http_request();
        assert!(wants_json(&req));
        let resp = render(&req, Flow::Web, "/r", &result(PaymentStatus::Pending, "wait"));
        assert_eq!(resp.status(), 202);
    }
}
