//! Page serving over HTTP.
//!
//! Every request the listener does not claim itself (`/ws`, `/health`)
//! falls through to [`ServingApp::serve`].

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::application::ServingApp;
use crate::page::{PageRequest, Rendered};

pub fn pages_router(app: Arc<ServingApp>) -> Router {
    Router::new().fallback(page_handler).with_state(app)
}

async fn page_handler(State(app): State<Arc<ServingApp>>, uri: Uri) -> Response {
    let url = uri.path_and_query().map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());
    let request = PageRequest::new(&url);

    // Collaborators may touch the filesystem.
    match tokio::task::spawn_blocking(move || app.serve(&request)).await {
        Ok(rendered) => into_response(rendered),
        Err(e) => {
            warn!("Page task failed for {url}: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn into_response(rendered: Rendered) -> Response {
    let status = StatusCode::from_u16(rendered.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, rendered.content_type)], rendered.body).into_response()
}
