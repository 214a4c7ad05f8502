//! Route table and resolver.
//!
//! Patterns are literal paths. Resolution tries the request path exactly,
//! then drops one trailing segment at a time until it reaches `/`:
//!
//! ```text
//! /admin/users/42 → /admin/users → /admin → /
//! ```
//!
//! so the longest registered pattern on a segment boundary always wins.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use pagestream_protocol::ConfigError;

use crate::client::Client;
use crate::page::{PageRequest, Rendered, ServeError};

/// Serves a page route that is not backed by a client.
pub trait RouteHandler: Send + Sync {
    fn handle(&self, request: &PageRequest) -> Result<Rendered, ServeError>;
}

impl<F> RouteHandler for F
where
    F: Fn(&PageRequest) -> Result<Rendered, ServeError> + Send + Sync,
{
    fn handle(&self, request: &PageRequest) -> Result<Rendered, ServeError> {
        self(request)
    }
}

#[derive(Clone)]
pub enum RouteTarget {
    Client(Arc<Client>),
    Handler(Arc<dyn RouteHandler>),
}

impl RouteTarget {
    pub fn handler(handler: impl RouteHandler + 'static) -> Self {
        Self::Handler(Arc::new(handler))
    }

    /// Identity comparison.
    pub fn same_target(&self, other: &RouteTarget) -> bool {
        match (self, other) {
            (Self::Client(a), Self::Client(b)) => Arc::ptr_eq(a, b),
            (Self::Handler(a), Self::Handler(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn render(&self, request: &PageRequest) -> Result<Rendered, ServeError> {
        match self {
            Self::Client(client) => client.render(request),
            Self::Handler(handler) => handler.handle(request),
        }
    }
}

impl From<Arc<Client>> for RouteTarget {
    fn from(client: Arc<Client>) -> Self {
        Self::Client(client)
    }
}

impl fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(c) => f.debug_tuple("Client").field(&c.view_name()).finish(),
            Self::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

/// Trailing slashes carry no meaning: `/admin/` and `/admin` are one route.
fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, RouteTarget>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `target` under `pattern`, returning the target it replaced.
    pub fn route(
        &mut self,
        pattern: &str,
        target: impl Into<RouteTarget>,
    ) -> Result<Option<RouteTarget>, ConfigError> {
        if !pattern.starts_with('/') {
            return Err(ConfigError::InvalidRoute(pattern.to_string()));
        }
        Ok(self.routes.insert(normalize(pattern).to_string(), target.into()))
    }

    pub fn get(&self, pattern: &str) -> Option<&RouteTarget> {
        self.routes.get(normalize(pattern))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered patterns, sorted.
    pub fn patterns(&self) -> Vec<&str> {
        let mut patterns: Vec<_> = self.routes.keys().map(String::as_str).collect();
        patterns.sort_unstable();
        patterns
    }

    /// Check for the base route and hand back a read-only resolver.
    pub fn freeze(self) -> Result<RouteResolver, ConfigError> {
        if !self.routes.contains_key("/") {
            return Err(ConfigError::MissingRootRoute);
        }
        Ok(RouteResolver { table: self })
    }
}

/// Candidate patterns for `path`, longest first, ending with `/`.
pub fn candidates(path: &str) -> impl Iterator<Item = &str> {
    let mut next = Some(normalize(path));
    std::iter::from_fn(move || {
        let current = next?;
        next = match current.rfind('/') {
            _ if current == "/" => None,
            Some(0) | None => Some("/"),
            Some(i) => Some(&current[..i]),
        };
        Some(current)
    })
}

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The pattern that matched.
    pub pattern: String,
    pub target: RouteTarget,
    /// How many segments were dropped before matching.
    pub trimmed: usize,
}

/// Resolve `path` against `table` by progressive segment shortening.
pub fn resolve(table: &RouteTable, path: &str) -> Option<Resolution> {
    candidates(path).enumerate().find_map(|(trimmed, candidate)| {
        table.routes.get(candidate).map(|target| Resolution {
            pattern: candidate.to_string(),
            target: target.clone(),
            trimmed,
        })
    })
}

/// A route table known to contain `/`. Read-only.
#[derive(Debug, Clone)]
pub struct RouteResolver {
    table: RouteTable,
}

impl RouteResolver {
    pub fn resolve(&self, path: &str) -> Option<Resolution> {
        resolve(&self.table, path)
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }
}
