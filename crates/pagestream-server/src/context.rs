//! Application context, handed explicitly to factories and components.
//!
//! Every factory and component that needs to know about the application
//! receives an [`AppContext`]. It carries the application's metadata plus
//! handles to the shared event bus and broadcast stream. It does not own
//! any registry, so holding one never keeps the registries alive.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pagestream_protocol::ConfigError;
use pagestream_transport::{BroadcastStream, EventBus};

/// Environment variable naming the deployment environment.
pub const ENV_VAR: &str = "PAGESTREAM_ENV";

/// Startup options.
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Application root directory (forward slashes only)
    pub root: PathBuf,
    /// Deployment environment, lowercase
    pub env: String,
    /// Reserved path prefix for asset requests; starts and ends with `/`
    pub asset_prefix: String,
    /// Directory under `root` served for static requests
    pub static_dir: String,
    /// Capacity of the outbound broadcast stream
    pub broadcast_capacity: usize,
    /// Capacity of the system event bus
    pub event_capacity: usize,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            env: "development".into(),
            asset_prefix: "/_assets/".into(),
            static_dir: "client/public".into(),
            broadcast_capacity: 1024,
            event_capacity: 256,
        }
    }
}

impl AppOptions {
    /// Options from the process environment: the current directory as root
    /// and `PAGESTREAM_ENV` as the environment.
    pub fn from_env() -> Self {
        let root = std::env::current_dir()
            .map(|d| normalize_root(&d))
            .unwrap_or_else(|_| PathBuf::from("."));
        let env = std::env::var(ENV_VAR)
            .map(|e| e.to_lowercase())
            .unwrap_or_else(|_| "development".into());

        Self { root, env, ..Self::default() }
    }

    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        self.root = normalize_root(root.as_ref());
        self
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into().to_lowercase();
        self
    }

    pub fn with_static_dir(mut self, dir: impl Into<String>) -> Self {
        self.static_dir = dir.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.asset_prefix.starts_with('/') || !self.asset_prefix.ends_with('/') || self.asset_prefix.len() < 3 {
            return Err(ConfigError::InvalidOptions {
                name: "asset_prefix",
                reason: format!("{:?} must look like /name/", self.asset_prefix),
            });
        }
        if self.env.is_empty() {
            return Err(ConfigError::InvalidOptions {
                name: "env",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }
}

fn normalize_root(path: &Path) -> PathBuf {
    PathBuf::from(path.to_string_lossy().replace('\\', "/"))
}

#[derive(Debug)]
struct ContextInner {
    id: String,
    root: PathBuf,
    env: String,
    version: String,
    asset_prefix: String,
    static_dir: String,
    events: EventBus,
    broadcast: BroadcastStream,
}

/// Shared, cheaply cloneable handle to the application's context.
#[derive(Debug, Clone)]
pub struct AppContext {
    inner: Arc<ContextInner>,
}

impl AppContext {
    pub fn new(options: &AppOptions) -> Self {
        Self::with_streams(
            options,
            EventBus::new(options.event_capacity),
            BroadcastStream::new(options.broadcast_capacity),
        )
    }

    /// Build a context around existing streams (e.g. ones already shared
    /// with a listener).
    pub fn with_streams(options: &AppOptions, events: EventBus, broadcast: BroadcastStream) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: uuid::Uuid::new_v4().to_string(),
                root: options.root.clone(),
                env: options.env.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                asset_prefix: options.asset_prefix.clone(),
                static_dir: options.static_dir.clone(),
                events,
                broadcast,
            }),
        }
    }

    /// Unique identifier of this application instance.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn env(&self) -> &str {
        &self.inner.env
    }

    pub fn is_production(&self) -> bool {
        self.inner.env == "production"
    }

    pub fn version(&self) -> &str {
        &self.inner.version
    }

    pub fn asset_prefix(&self) -> &str {
        &self.inner.asset_prefix
    }

    pub fn static_dir(&self) -> &str {
        &self.inner.static_dir
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// The process-wide outbound broadcast stream.
    pub fn broadcast(&self) -> &BroadcastStream {
        &self.inner.broadcast
    }
}
