use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde_json::json;
use tracing::*;
use url::Url;

use crate::{
    logger,
    server::error::{Error, Result},
    settings,
};

const UPSTREAM_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

// Shared client for all upstream calls
pub fn upstream_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .build()
        .expect("Failed building the upstream HTTP client")
}

pub async fn info() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "authors": env!("CARGO_PKG_AUTHORS"),
    }))
}

pub async fn log() -> HttpResponse {
    let (_receiver, history) = logger::manager::HISTORY.lock().unwrap().subscribe();
    HttpResponse::Ok().json(history)
}

// Convenience route used by the front-end to list measurement servers
pub async fn servers(upstream_client: web::Data<reqwest::Client>) -> Result<HttpResponse> {
    let url = upstream_url(&settings::manager::upstream_base_url(), "/measurementServer", "");

    let request = upstream_client
        .get(&url)
        .header("Content-Type", "application/json")
        .header("X-Nettest-Client", settings::manager::client_id());

    match request.send().await {
        Ok(response) => Ok(relay_response(response).await),
        Err(error) => {
            error!("Error fetching servers from {url:?}: {error:#?}");
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": "Failed to fetch servers",
            })))
        }
    }
}

/// Pass-through forwarder: any method on `/api/proxy/{tail}` goes to the
/// upstream control server with the same tail, body, and query string,
/// carrying the client-identifying header. Holds no state.
pub async fn proxy(
    req: HttpRequest,
    body: web::Bytes,
    upstream_client: web::Data<reqwest::Client>,
) -> Result<HttpResponse> {
    let tail = req.path().trim_start_matches("/api/proxy");
    let target = upstream_url(
        &settings::manager::upstream_base_url(),
        tail,
        req.query_string(),
    );

    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .map_err(|error| Error::BadRequest(format!("Unsupported method: {error}")))?;

    debug!("Forwarding {method} {target}");

    let mut request = upstream_client
        .request(method, &target)
        .header("Content-Type", "application/json")
        .header("Accept", "application/json")
        .header("X-Nettest-Client", settings::manager::client_id());

    if let Some(authorization) = req.headers().get(header::AUTHORIZATION) {
        request = request.header("Authorization", authorization.as_bytes());
    }

    if !body.is_empty() {
        request = request.body(body.to_vec());
    }

    match request.send().await {
        Ok(response) => Ok(relay_response(response).await),
        Err(error) => {
            error!("Proxy request to {target:?} failed: {error:#?}");
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": "Proxy request failed",
                "details": error.to_string(),
                "status": 500,
            })))
        }
    }
}

// Propagate the upstream status code and body. Non-JSON payloads are
// relayed as a JSON string, the same way the original relay did.
async fn relay_response(response: reqwest::Response) -> HttpResponse {
    let status = actix_web::http::StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);

    let text = response.text().await.unwrap_or_default();
    let payload: serde_json::Value =
        serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));

    HttpResponse::build(status).json(payload)
}

fn upstream_url(base: &Url, tail: &str, query: &str) -> String {
    let base = base.as_str().trim_end_matches('/');
    if query.is_empty() {
        format!("{base}{tail}")
    } else {
        format!("{base}{tail}?{query}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_url_joins_base_tail_and_query() {
        let base = Url::parse("https://api-beta.nettest.org").unwrap();

        assert_eq!(
            upstream_url(&base, "/measurementServer", ""),
            "https://api-beta.nettest.org/measurementServer"
        );
        assert_eq!(
            upstream_url(&base, "/testRequest", "uuid=42&client=nt"),
            "https://api-beta.nettest.org/testRequest?uuid=42&client=nt"
        );
    }

    #[test]
    fn upstream_url_tolerates_trailing_slash_on_base() {
        let base = Url::parse("https://control.example.com/api/").unwrap();

        assert_eq!(
            upstream_url(&base, "/settings", ""),
            "https://control.example.com/api/settings"
        );
    }
}
