use actix_cors::Cors;
use actix_extensible_rate_limit::{
    backend::{memory::InMemoryBackend, SimpleInputFunctionBuilder},
    RateLimiter,
};
use actix_web::{error::JsonPayloadError, web, App, HttpRequest, HttpServer};
use tracing::*;
use tracing_actix_web::TracingLogger;

use super::pages;

fn json_error_handler(error: JsonPayloadError, _: &HttpRequest) -> actix_web::Error {
    warn!("Problem with json: {error}");
    error.into()
}

// Start REST API server with the desired address
pub async fn run(server_address: &str) -> Result<(), std::io::Error> {
    let server_address = server_address.to_string();
    let upstream_client = web::Data::new(pages::upstream_client());

    HttpServer::new(move || {
        App::new()
            .app_data(upstream_client.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .send_wildcard()
                    .max_age(3600),
            )
            .wrap(TracingLogger::default())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .route("/info", web::get().to(pages::info))
            .route("/log", web::get().to(pages::log))
            .route("/api/servers", web::get().to(pages::servers))
            .service(
                web::scope("/api/proxy")
                    // Add a rate limiter to prevent flood
                    .wrap(
                        RateLimiter::builder(
                            InMemoryBackend::builder().build(),
                            SimpleInputFunctionBuilder::new(
                                std::time::Duration::from_secs(1),
                                50,
                            )
                            .real_ip_key()
                            .build(),
                        )
                        .add_headers()
                        .build(),
                    )
                    // Forwarded paths are open-ended, so match any method on any tail
                    .default_service(web::route().to(pages::proxy)),
            )
    })
    .bind(server_address)
    .expect("Failed starting web API")
    .run()
    .await
}
