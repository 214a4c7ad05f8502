//! ClientRegistry: the ordered set of registered clients.
//!
//! Clients are kept in registration order, keyed by view name. The registry
//! is filled during startup and read-only afterwards, so it needs no lock.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use pagestream_protocol::{ClientOpError, ConfigError};
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::Client;

/// Result of a broadcast operation on one client.
#[derive(Debug, Clone, PartialEq)]
pub enum OpResult {
    Ok(Value),
    Failed(ClientOpError),
    /// The client does not define the operation.
    Skipped,
}

impl OpResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// One slot of a broadcast result, in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastOutcome {
    pub client: String,
    pub result: OpResult,
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Vec<Arc<Client>>,
    index: HashMap<String, usize>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under its view name.
    pub fn add(&mut self, client: Arc<Client>) -> Result<(), ConfigError> {
        let name = client.view_name().to_string();
        if self.index.contains_key(&name) {
            return Err(ConfigError::DuplicateClient(name));
        }

        self.index.insert(name, self.clients.len());
        self.clients.push(client);
        Ok(())
    }

    pub fn get(&self, view: &str) -> Option<&Arc<Client>> {
        self.index.get(view).map(|&i| &self.clients[i])
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Client>> {
        self.clients.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clients.iter().map(|c| c.view_name())
    }

    /// Apply `op` to every client in registration order.
    ///
    /// Best effort: a failing or panicking client's error lands in its own
    /// slot and the remaining clients still run. Clients without the
    /// operation are skipped.
    pub fn broadcast(&self, op: &str, args: &[Value]) -> Vec<BroadcastOutcome> {
        self.clients
            .iter()
            .map(|client| {
                let applied = panic::catch_unwind(AssertUnwindSafe(|| client.apply_raw(op, args)))
                    .unwrap_or_else(|panic| {
                        let reason = format!("panicked: {}", panic_message(panic.as_ref()));
                        Some(Err(ClientOpError::new(reason)))
                    });
                let result = match applied {
                    Some(Ok(value)) => OpResult::Ok(value),
                    Some(Err(e)) => {
                        warn!("Client {} failed {op}: {e}", client.view_name());
                        OpResult::Failed(e)
                    }
                    None => {
                        debug!("Client {} has no operation {op}", client.view_name());
                        OpResult::Skipped
                    }
                };
                BroadcastOutcome { client: client.view_name().to_string(), result }
            })
            .collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientBuilder;
    use crate::context::{AppContext, AppOptions};
    use serde_json::json;

    fn client(view: &str) -> ClientBuilder {
        ClientBuilder::new(view)
    }

    fn build(builder: ClientBuilder, ctx: &AppContext) -> Arc<Client> {
        Arc::new(builder.build(ctx.clone()))
    }

    #[test]
    fn duplicate_view_name_is_rejected() {
        let ctx = AppContext::new(&AppOptions::default());
        let mut registry = ClientRegistry::new();
        registry.add(build(client("main"), &ctx)).unwrap();

        let err = registry.add(build(client("main"), &ctx)).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateClient("main".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn keeps_registration_order() {
        let ctx = AppContext::new(&AppOptions::default());
        let mut registry = ClientRegistry::new();
        for view in ["zeta", "alpha", "mid"] {
            registry.add(build(client(view), &ctx)).unwrap();
        }
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
        assert_eq!(registry.get("alpha").unwrap().view_name(), "alpha");
    }

    #[test]
    fn broadcast_captures_failure_per_client() {
        let ctx = AppContext::new(&AppOptions::default());
        let mut registry = ClientRegistry::new();
        registry
            .add(build(client("main").on("sync", |_, _| Ok(json!("main synced"))), &ctx))
            .unwrap();
        registry
            .add(build(client("admin").on("sync", |_, _| Err(ClientOpError::new("admin offline"))), &ctx))
            .unwrap();
        registry
            .add(build(client("mobile").on("sync", |_, _| Ok(json!("mobile synced"))), &ctx))
            .unwrap();

        let outcomes = registry.broadcast("sync", &[]);
        let names: Vec<_> = outcomes.iter().map(|o| o.client.as_str()).collect();
        assert_eq!(names, vec!["main", "admin", "mobile"]);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(outcomes[1].result, OpResult::Failed(ClientOpError::new("admin offline")));
        assert!(outcomes[2].result.is_ok());
    }

    #[test]
    fn panicking_operation_is_captured_and_siblings_still_run() {
        let ctx = AppContext::new(&AppOptions::default());
        let mobile_ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = mobile_ran.clone();

        let mut registry = ClientRegistry::new();
        registry.add(build(client("main").on("sync", |_, _| Ok(json!("ok"))), &ctx)).unwrap();
        registry
            .add(build(client("admin").on("sync", |_, args| Ok(args[0].clone())), &ctx))
            .unwrap();
        registry
            .add(build(
                client("mobile").on("sync", move |_, _| {
                    flag.store(true, std::sync::atomic::Ordering::SeqCst);
                    Ok(json!("ok"))
                }),
                &ctx,
            ))
            .unwrap();

        let outcomes = registry.broadcast("sync", &[]);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].result.is_ok());
        match &outcomes[1].result {
            OpResult::Failed(e) => assert!(e.message.starts_with("panicked:"), "{}", e.message),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(outcomes[2].result.is_ok());
        assert!(mobile_ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn unknown_operation_is_skipped() {
        let ctx = AppContext::new(&AppOptions::default());
        let mut registry = ClientRegistry::new();
        registry.add(build(client("main").on("sync", |_, _| Ok(json!(1))), &ctx)).unwrap();
        registry.add(build(client("admin"), &ctx)).unwrap();

        let outcomes = registry.broadcast("sync", &[]);
        assert_eq!(outcomes[0].result, OpResult::Ok(json!(1)));
        assert_eq!(outcomes[1].result, OpResult::Skipped);
    }

    #[test]
    fn broadcast_over_no_clients_is_empty() {
        let registry = ClientRegistry::new();
        assert!(registry.broadcast("sync", &[json!(1)]).is_empty());
    }

    #[test]
    fn broadcast_passes_args() {
        let ctx = AppContext::new(&AppOptions::default());
        let mut registry = ClientRegistry::new();
        registry
            .add(build(client("main").on("add", |_, args| {
                let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
                Ok(json!(sum))
            }), &ctx))
            .unwrap();

        let outcomes = registry.broadcast("add", &[json!(2), json!(3)]);
        assert_eq!(outcomes[0].result, OpResult::Ok(json!(5)));
    }
}
