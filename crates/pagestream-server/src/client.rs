//! Client definitions.
//!
//! A [`Client`] is one logical single-page client: a view name, the asset
//! path patterns its bundle is built from, a renderer, and a table of named
//! operations the registry can broadcast. Clients are assembled with a
//! [`ClientBuilder`] and are immutable once built.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use pagestream_protocol::ClientOpError;
use serde_json::Value;

use crate::context::AppContext;
use crate::page::{PageRequest, Rendered, ServeError, View};

/// A named operation. Receives the client it runs on plus broadcast args.
pub type ClientOp = Arc<dyn Fn(&Client, &[Value]) -> Result<Value, ClientOpError> + Send + Sync>;

/// Asset path patterns, relative to the application root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPaths {
    pub css: Vec<String>,
    pub code: Vec<String>,
    pub tmpl: Vec<String>,
}

impl ClientPaths {
    /// Conventional layout under `client/<view>/`.
    pub fn for_view(view: &str) -> Self {
        Self {
            css: vec![format!("client/{view}/css/*.css")],
            code: vec![format!("client/{view}/code/**/*.js")],
            tmpl: vec![format!("client/{view}/tmpl/*.html")],
        }
    }

    pub fn css(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.css = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn code(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.code = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn tmpl(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tmpl = patterns.into_iter().map(Into::into).collect();
        self
    }
}

pub struct ClientBuilder {
    view: String,
    paths: Option<ClientPaths>,
    renderer: Option<Arc<dyn View>>,
    operations: BTreeMap<String, ClientOp>,
}

impl ClientBuilder {
    pub fn new(view: impl Into<String>) -> Self {
        Self {
            view: view.into(),
            paths: None,
            renderer: None,
            operations: BTreeMap::new(),
        }
    }

    pub fn view_name(&self) -> &str {
        &self.view
    }

    pub fn paths(mut self, paths: ClientPaths) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn renderer(mut self, view: impl View + 'static) -> Self {
        self.renderer = Some(Arc::new(view));
        self
    }

    /// Add a named operation. A later `on` with the same name replaces it.
    pub fn on<F>(mut self, name: impl Into<String>, op: F) -> Self
    where
        F: Fn(&Client, &[Value]) -> Result<Value, ClientOpError> + Send + Sync + 'static,
    {
        self.operations.insert(name.into(), Arc::new(op));
        self
    }

    pub fn build(self, context: AppContext) -> Client {
        let paths = self.paths.unwrap_or_else(|| ClientPaths::for_view(&self.view));
        Client {
            view: self.view,
            paths,
            renderer: self.renderer,
            operations: self.operations,
            context,
        }
    }
}

pub struct Client {
    view: String,
    paths: ClientPaths,
    renderer: Option<Arc<dyn View>>,
    operations: BTreeMap<String, ClientOp>,
    context: AppContext,
}

impl Client {
    pub fn view_name(&self) -> &str {
        &self.view
    }

    pub fn paths(&self) -> &ClientPaths {
        &self.paths
    }

    /// The application this client belongs to.
    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn supports(&self, op: &str) -> bool {
        self.operations.contains_key(op)
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    /// Run a named operation. `None` when this client has no such operation.
    pub fn apply_raw(&self, op: &str, args: &[Value]) -> Option<Result<Value, ClientOpError>> {
        let f = self.operations.get(op)?;
        Some(f(self, args))
    }

    /// Render this client's page. Without a renderer, a minimal shell page
    /// referencing the client's bundle is produced.
    pub fn render(&self, request: &PageRequest) -> Result<Rendered, ServeError> {
        match &self.renderer {
            Some(view) => view.render(self, request),
            None => Ok(Rendered::html(self.shell_page())),
        }
    }

    fn shell_page(&self) -> String {
        let prefix = self.context.asset_prefix();
        format!(
            "<!DOCTYPE html>\n<html><head><title>{view}</title>\
             <link rel=\"stylesheet\" href=\"{prefix}{view}.css\"></head>\
             <body><script src=\"{prefix}{view}.js\"></script></body></html>\n",
            view = self.view,
        )
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("view", &self.view)
            .field("paths", &self.paths)
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .field("has_renderer", &self.renderer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AppOptions;
    use serde_json::json;

    fn ctx() -> AppContext {
        AppContext::new(&AppOptions::default())
    }

    #[test]
    fn default_paths_follow_view_name() {
        let client = ClientBuilder::new("main").build(ctx());
        assert_eq!(client.paths().css, vec!["client/main/css/*.css".to_string()]);
    }

    #[test]
    fn apply_raw_runs_named_operation() {
        let client = ClientBuilder::new("main")
            .on("greet", |c, args| Ok(json!(format!("{} says {}", c.view_name(), args[0]))))
            .build(ctx());

        let result = client.apply_raw("greet", &[json!("hi")]);
        assert_eq!(result, Some(Ok(json!("main says \"hi\""))));
        assert!(client.apply_raw("missing", &[]).is_none());
    }

    #[test]
    fn later_on_replaces_operation() {
        let client = ClientBuilder::new("main")
            .on("sync", |_, _| Ok(json!(1)))
            .on("sync", |_, _| Ok(json!(2)))
            .build(ctx());
        assert_eq!(client.apply_raw("sync", &[]), Some(Ok(json!(2))));
        assert_eq!(client.operations().collect::<Vec<_>>(), vec!["sync"]);
    }

    #[test]
    fn shell_page_links_bundle() {
        let client = ClientBuilder::new("admin").build(ctx());
        let page = client.render(&PageRequest::new("/admin")).unwrap();
        let body = String::from_utf8(page.body).unwrap();
        assert!(body.contains("/_assets/admin.js"));
    }

    #[test]
    fn custom_renderer_is_used() {
        let client = ClientBuilder::new("main")
            .renderer(|c: &Client, req: &PageRequest| {
                Ok::<_, ServeError>(Rendered::text(format!("{}:{}", c.view_name(), req.path())))
            })
            .build(ctx());
        let page = client.render(&PageRequest::new("/x/y")).unwrap();
        assert_eq!(page.body, b"main:/x/y");
    }
}
