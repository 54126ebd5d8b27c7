//! HTTP handlers for the fixed embedded pages.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{instrument, warn};

use crate::static_assets::Assets;

fn embedded(path: &str) -> Response {
    let Some(content) = Assets::get(path) else {
        warn!(path, "Embedded asset missing from build");
        return StatusCode::NOT_FOUND.into_response();
    };

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let content_type = HeaderValue::from_str(mime.as_ref()).unwrap_or(HeaderValue::from_static("application/octet-stream"));

    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        content.data.into_owned(),
    )
        .into_response()
}

/// `GET /`
#[instrument]
pub async fn index() -> Response {
    embedded("index.html")
}

/// `GET /favicon.ico`
#[instrument]
pub async fn favicon() -> Response {
    embedded("favicon.ico")
}
