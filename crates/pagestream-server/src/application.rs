//! Application assembly and the frozen serving view of it.
//!
//! ```text
//! Application (mutable, startup only)
//!   ├── ClientRegistry
//!   ├── RouteTable
//!   ├── PreprocessorTable
//!   ├── MessageRouter
//!   └── AssetServer / StaticServer
//!          │
//!          ▼ start()
//! ServingApp (immutable, shared behind Arc)
//! ```
//!
//! Everything is registered on an [`Application`]. [`Application::start`]
//! checks the configuration and consumes it into a [`ServingApp`], which has
//! no mutating methods at all.

use std::sync::Arc;

use pagestream_protocol::{ConfigError, SystemEvent};
use pagestream_transport::{BroadcastStream, EventBus};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::assets::{AssetServer, BundleAssetServer, DirStaticServer, Preprocessor, PreprocessorTable, StaticServer};
use crate::client::{Client, ClientBuilder};
use crate::context::{AppContext, AppOptions};
use crate::page::{PageRequest, Rendered};
use crate::registry::{BroadcastOutcome, ClientRegistry};
use crate::responder::Responder;
use crate::router::MessageRouter;
use crate::routes::{Resolution, RouteResolver, RouteTable, RouteTarget};

pub struct Application {
    context: AppContext,
    clients: ClientRegistry,
    routes: RouteTable,
    preprocessors: PreprocessorTable,
    router: MessageRouter,
    asset_server: Arc<dyn AssetServer>,
    static_server: Arc<dyn StaticServer>,
}

impl Application {
    pub fn new(options: AppOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self::with_context(AppContext::new(&options)))
    }

    /// Assemble around an existing context.
    pub fn with_context(context: AppContext) -> Self {
        info!(
            "Assembling application {} (env: {}, root: {})",
            context.id(),
            context.env(),
            context.root().display()
        );
        Self {
            router: MessageRouter::new(context.clone()),
            asset_server: Arc::new(BundleAssetServer::new(context.asset_prefix())),
            static_server: Arc::new(DirStaticServer),
            clients: ClientRegistry::new(),
            routes: RouteTable::new(),
            preprocessors: PreprocessorTable::new(),
            context,
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn events(&self) -> &EventBus {
        self.context.events()
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Build and register a client.
    pub fn client(&mut self, builder: ClientBuilder) -> Result<Arc<Client>, ConfigError> {
        let client = Arc::new(builder.build(self.context.clone()));
        self.clients.add(client.clone())?;

        info!("Registered client: {}", client.view_name());
        self.events().emit(SystemEvent::ClientRegistered { view: client.view_name().to_string() });
        Ok(client)
    }

    /// Register a page route. Re-registering a pattern replaces its target.
    pub fn route(&mut self, pattern: &str, target: impl Into<RouteTarget>) -> Result<(), ConfigError> {
        if self.routes.route(pattern, target)?.is_some() {
            warn!("Route {pattern} replaced");
            self.events().emit(SystemEvent::RouteReplaced { pattern: pattern.to_string() });
        } else {
            debug!("Route {pattern} registered");
        }
        Ok(())
    }

    pub fn responder<R: Responder>(&mut self, name: impl Into<String>, responder: R) {
        self.router.register(name, responder);
    }

    /// Register a responder built by `factory(context, options)`.
    pub fn register_responder<R, O, F>(&mut self, name: impl Into<String>, factory: F, options: O)
    where
        R: Responder,
        F: FnOnce(&AppContext, O) -> R,
    {
        self.router.register_responder(name, factory, options);
    }

    pub fn preprocessor<I, S>(&mut self, exts: I, transform: impl Preprocessor + 'static)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for ext in self.preprocessors.register(exts, Arc::new(transform)) {
            warn!("Preprocessor for .{ext} replaced");
        }
    }

    pub fn asset_server(&mut self, server: impl AssetServer + 'static) {
        self.asset_server = Arc::new(server);
    }

    pub fn static_server(&mut self, server: impl StaticServer + 'static) {
        self.static_server = Arc::new(server);
    }

    /// Validate and freeze. Fails if no target is registered for `/`.
    pub fn start(self) -> Result<Arc<ServingApp>, ConfigError> {
        let resolver = self.routes.freeze()?;

        info!(
            "Application ready: {} clients, {} routes, {} responders",
            self.clients.len(),
            resolver.table().len(),
            self.router.len()
        );

        Ok(Arc::new(ServingApp {
            context: self.context,
            clients: self.clients,
            resolver,
            preprocessors: self.preprocessors,
            router: Arc::new(self.router),
            asset_server: self.asset_server,
            static_server: self.static_server,
        }))
    }
}

/// How a page request will be served.
#[derive(Debug, Clone)]
pub enum RequestKind {
    Asset,
    Static,
    Page(Resolution),
    NotFound,
}

/// The read-only application, shared by the HTTP and WebSocket sides.
pub struct ServingApp {
    context: AppContext,
    clients: ClientRegistry,
    resolver: RouteResolver,
    preprocessors: PreprocessorTable,
    router: Arc<MessageRouter>,
    asset_server: Arc<dyn AssetServer>,
    static_server: Arc<dyn StaticServer>,
}

impl ServingApp {
    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn resolver(&self) -> &RouteResolver {
        &self.resolver
    }

    pub fn preprocessors(&self) -> &PreprocessorTable {
        &self.preprocessors
    }

    /// The message handler to give the listener.
    pub fn router(&self) -> Arc<MessageRouter> {
        self.router.clone()
    }

    pub fn broadcast_stream(&self) -> &BroadcastStream {
        self.context.broadcast()
    }

    pub fn events(&self) -> &EventBus {
        self.context.events()
    }

    pub fn classify(&self, request: &PageRequest) -> RequestKind {
        let path = request.path();
        if path.starts_with(self.context.asset_prefix()) {
            RequestKind::Asset
        } else if path.contains('.') {
            RequestKind::Static
        } else {
            match self.resolver.resolve(path) {
                Some(resolution) => RequestKind::Page(resolution),
                None => RequestKind::NotFound,
            }
        }
    }

    /// Serve one page request. Collaborator failures become a 500.
    pub fn serve(&self, request: &PageRequest) -> Rendered {
        let root = self.context.root();
        let result = match self.classify(request) {
            RequestKind::Asset => self.asset_server.serve(root, &self.clients, &self.preprocessors, request),
            RequestKind::Static => self.static_server.serve(root, self.context.static_dir(), request),
            RequestKind::Page(resolution) => {
                debug!("{} → {} ({} trimmed)", request.path(), resolution.pattern, resolution.trimmed);
                resolution.target.render(request)
            }
            RequestKind::NotFound => Ok(Rendered::not_found()),
        };

        result.unwrap_or_else(|e| {
            warn!("Serving {} failed: {e}", request.path());
            Rendered::error(e.to_string())
        })
    }

    /// Publish `payload` on `channel` to every open connection.
    pub fn broadcast(&self, channel: &str, payload: Value) -> usize {
        self.context.broadcast().publish(channel, payload)
    }

    /// Run a named operation on every registered client.
    pub fn broadcast_clients(&self, op: &str, args: &[Value]) -> Vec<BroadcastOutcome> {
        self.clients.broadcast(op, args)
    }
}

impl std::fmt::Debug for ServingApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServingApp")
            .field("id", &self.context.id())
            .field("clients", &self.clients.names().collect::<Vec<_>>())
            .field("routes", &self.resolver.table().patterns())
            .field("router", &self.router)
            .finish()
    }
}
