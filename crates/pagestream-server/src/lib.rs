//! Pagestream Server: clients, routes and responders.
//!
//! An [`Application`] collects client definitions, page routes,
//! preprocessors and responders during startup. `start()` freezes it into a
//! [`ServingApp`] whose [`MessageRouter`] is the `MessageHandler` for the
//! transport layer and whose [`pages_router`] serves HTTP page requests.

pub mod application;
pub mod assets;
pub mod client;
pub mod context;
pub mod http;
pub mod page;
pub mod registry;
pub mod responder;
pub mod responders;
pub mod router;
pub mod routes;

pub use application::{Application, RequestKind, ServingApp};
pub use assets::{AssetServer, BundleAssetServer, DirStaticServer, Preprocessor, PreprocessorTable, StaticServer};
pub use client::{Client, ClientBuilder, ClientOp, ClientPaths};
pub use context::{AppContext, AppOptions};
pub use http::pages_router;
pub use page::{PageRequest, Rendered, ServeError, View};
pub use registry::{BroadcastOutcome, ClientRegistry, OpResult};
pub use responder::{Responder, ResponderError};
pub use responders::{EchoResponder, PublishOptions, PublishResponder};
pub use router::MessageRouter;
pub use routes::{Resolution, RouteHandler, RouteResolver, RouteTable, RouteTarget};
