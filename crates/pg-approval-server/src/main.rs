use actix_cors::Cors;
use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{web, App, HttpServer};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pg_approval_server::bootstrap::bootstrap;
use pg_approval_server::config::ServerConfig;
use pg_approval_server::routes;

fn build_cors(origins: &[String]) -> Cors {
    if origins.is_empty() {
        // Default: allow localhost on any port
        Cors::default()
            .allowed_origin_fn(|origin, _| {
                origin
                    .to_str()
                    .map(|o| o == "http://localhost" || o.starts_with("http://localhost:"))
                    .unwrap_or(false)
            })
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec!["content-type", "authorization", "accept"])
            .max_age(3600)
    } else {
        let mut cors = Cors::default();
        for origin in origins {
            cors = cors.allowed_origin(origin);
        }
        cors.allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec!["content-type", "authorization", "accept"])
            .max_age(3600)
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let state = match bootstrap(&config) {
        Ok(state) => web::Data::from(state),
        Err(e) => {
            tracing::error!("Refusing to start: {e}");
            std::process::exit(1);
        }
    };

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(config.rate_limit_rpm)
        .finish()
        .ok_or_else(|| std::io::Error::other("invalid RATE_LIMIT_RPM"))?;

    let port = config.port;
    let cors_origins = config.allowed_origins.clone();

    tracing::info!("PG approval server listening on port {port}");
    tracing::info!("Merchant: {}", config.gateway.merchant_id);
    tracing::info!("Rate limit: {} req/min per IP", config.rate_limit_rpm);
    tracing::info!("  GET|POST http://localhost:{port}/payments/web/return");
    tracing::info!("  GET|POST http://localhost:{port}/payments/mobile/return");
    tracing::info!("  GET      http://localhost:{port}/payments/{{auth_token}}");

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&cors_origins))
            .wrap(Governor::new(&governor_conf))
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(65_536))
            .service(routes::health)
            .service(routes::metrics_endpoint)
            .service(routes::web_return)
            .service(routes::mobile_return)
            .service(routes::payment_status)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
