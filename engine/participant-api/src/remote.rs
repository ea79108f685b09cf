//! Remote object registry and request dispatch.
//!
//! The transport below this boundary is replaceable. A handler sees requests
//! as a method name plus string parameters, the shape a JSON-RPC style
//! transport adapter produces, and every proxy call can fail with a
//! [`RemoteCallError`] that the caller is expected to handle locally.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// Failure of a call across the remote boundary.
#[derive(Debug, Clone, Error)]
#[error("remote call failed: {message}")]
pub struct RemoteCallError {
    pub message: String,
}

impl RemoteCallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Errors of the remote object registry itself.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a remote object named `{0}` is already registered")]
    AlreadyRegistered(String),
    #[error("no remote object named `{0}` is registered")]
    NotFound(String),
}

/// Server side of a named remote object.
pub trait RemoteRequestHandler: Send + Sync {
    fn handle(&self, method: &str, params: &[&str]) -> Result<String, RemoteCallError>;
}

/// Registry of named request handlers reachable by remote callers.
pub trait RemoteObjectRegistry: Send + Sync {
    fn register_object(
        &self,
        name: &str,
        handler: Arc<dyn RemoteRequestHandler>,
    ) -> Result<(), RegistryError>;
    fn unregister_object(&self, name: &str) -> Result<(), RegistryError>;
    fn lookup(&self, name: &str) -> Option<Arc<dyn RemoteRequestHandler>>;
}

/// In-process registry. Serves single-process deployments and tests, where
/// "remote" objects live in the same address space.
#[derive(Default)]
pub struct MemoryRemoteRegistry {
    objects: RwLock<HashMap<String, Arc<dyn RemoteRequestHandler>>>,
}

impl MemoryRemoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RemoteObjectRegistry for MemoryRemoteRegistry {
    fn register_object(
        &self,
        name: &str,
        handler: Arc<dyn RemoteRequestHandler>,
    ) -> Result<(), RegistryError> {
        let mut objects = self.objects.write();
        if objects.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        objects.insert(name.to_string(), handler);
        Ok(())
    }

    fn unregister_object(&self, name: &str) -> Result<(), RegistryError> {
        match self.objects.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn RemoteRequestHandler>> {
        self.objects.read().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    impl RemoteRequestHandler for EchoHandler {
        fn handle(&self, method: &str, params: &[&str]) -> Result<String, RemoteCallError> {
            Ok(format!("{method}:{}", params.join(",")))
        }
    }

    #[test]
    fn register_lookup_unregister() {
        let registry = MemoryRemoteRegistry::new();
        registry.register_object("echo", Arc::new(EchoHandler)).unwrap();

        let handler = registry.lookup("echo").expect("registered");
        assert_eq!(handler.handle("ping", &["a", "b"]).unwrap(), "ping:a,b");

        assert!(matches!(
            registry.register_object("echo", Arc::new(EchoHandler)),
            Err(RegistryError::AlreadyRegistered(_))
        ));

        registry.unregister_object("echo").unwrap();
        assert!(registry.lookup("echo").is_none());
        assert!(matches!(registry.unregister_object("echo"), Err(RegistryError::NotFound(_))));
    }
}
