//! Cross-cutting request filters.
//!
//! Applied outermost first:
//!
//! 1. request tracing ([`TraceLayer`])
//! 2. panic recovery ([`CatchPanicLayer`], answers 500)
//! 3. HTTPS redirect, on the plaintext listener only ([`https_redirect_router`])

use axum::{
    Router,
    extract::Request,
    http::{HeaderValue, StatusCode, Uri, header, uri::Authority},
    response::{IntoResponse, Response},
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug};

/// Wrap `router` in the tracing and panic recovery filters.
pub fn apply(router: Router) -> Router {
    router.layer(CatchPanicLayer::new()).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// Router for the plaintext listener: every request is answered with a permanent redirect to
/// the same host, path and query over HTTPS.
pub fn https_redirect_router(https_port: u16) -> Router {
    apply(Router::new().fallback(move |request: Request| async move { redirect_to_https(&request, https_port) }))
}

fn redirect_to_https(request: &Request, https_port: u16) -> Response {
    let Some(location) = https_location(request, https_port) else {
        debug!(uri = %request.uri(), "Cannot redirect request without a host");
        return StatusCode::BAD_REQUEST.into_response();
    };

    match HeaderValue::from_str(&location) {
        Ok(value) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, value)]).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

/// The `https://` URL a plaintext request should move to.
pub fn https_location(request: &Request, https_port: u16) -> Option<String> {
    let authority = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<Authority>().ok())
        .or_else(|| request.uri().authority().cloned())?;

    let host = authority.host();
    let port = if https_port == 443 {
        String::new()
    } else {
        format!(":{https_port}")
    };
    let path_and_query = request.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    let location = format!("https://{host}{port}{path_and_query}");
    location.parse::<Uri>().ok().map(|_| location)
}
