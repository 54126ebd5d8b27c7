//! `GET /{id}`: stream a stored file back.
//!
//! Lookup is delegated to [`ServeDir`] rooted at the storage directory, which also handles
//! conditional requests and ranges. There is no access control.

use axum::{
    body::Body,
    extract::{Path, Request, State},
    response::{IntoResponse, Response},
};
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{debug, instrument};

use crate::{AppState, errors::Error};

/// Whether `id` names a single entry directly under the storage root.
fn is_plain_name(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\', '\0'])
}

#[instrument(skip(state, request))]
pub async fn serve_file(State(state): State<AppState>, Path(id): Path<String>, request: Request) -> Response {
    if !is_plain_name(&id) {
        debug!(id, "Refusing name outside the storage root");
        return Error::NotFound { id }.into_response();
    }

    let service = ServeDir::new(state.store.root()).append_index_html_on_directories(false);
    match service.oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}
