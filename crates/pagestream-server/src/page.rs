//! HTTP-side request and response values shared by views, route handlers
//! and the asset/static collaborators.

use thiserror::Error;

use crate::client::Client;

/// A page request with its query string and fragment split off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    path: String,
    query: Option<String>,
}

impl PageRequest {
    pub fn new(url: &str) -> Self {
        let without_fragment = url.split_once('#').map_or(url, |(head, _)| head);
        let (path, query) = match without_fragment.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (without_fragment, None),
        };
        let path = if path.is_empty() { "/".to_string() } else { path.to_string() };

        Self { path, query }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }
}

/// A rendered response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Rendered {
    pub fn new(status: u16, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self { status, content_type: content_type.into(), body: body.into() }
    }

    pub fn html(body: impl Into<String>) -> Self {
        Self::new(200, "text/html; charset=utf-8", body.into())
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::new(200, "text/plain; charset=utf-8", body.into())
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(200, "application/json", value.to_string())
    }

    pub fn not_found() -> Self {
        Self::new(404, "text/plain; charset=utf-8", "Not Found")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(500, "text/plain; charset=utf-8", message.into())
    }
}

/// Failures from the serving collaborators. Turned into a 500 response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServeError {
    #[error("render failed: {0}")]
    Render(String),

    #[error("asset request failed: {0}")]
    Asset(String),

    #[error("static request failed: {0}")]
    Static(String),
}

/// Renders one client's page.
pub trait View: Send + Sync {
    fn render(&self, client: &Client, request: &PageRequest) -> Result<Rendered, ServeError>;
}

impl<F> View for F
where
    F: Fn(&Client, &PageRequest) -> Result<Rendered, ServeError> + Send + Sync,
{
    fn render(&self, client: &Client, request: &PageRequest) -> Result<Rendered, ServeError> {
        self(client, request)
    }
}
