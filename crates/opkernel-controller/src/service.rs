//! Runtime services and the service-installation handle.
//!
//! How services actually run inside the host process is up to the
//! [`ServiceContainer`] implementation. Handlers only see a [`ServiceTarget`],
//! which journals every install and removal so the dispatcher can undo them
//! when the operation does not complete successfully.

use dashmap::DashMap;
use opkernel_core::ModelNode;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Service identifier - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct ServiceName(Arc<str>);

impl ServiceName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `parent.child` naming.
    pub fn append(&self, part: &str) -> Self {
        Self::new(format!("{}.{}", self.0, part))
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("service already installed: {0}")]
    Duplicate(ServiceName),

    #[error("service not found: {0}")]
    NotFound(ServiceName),

    #[error("service {name} failed to start: {message}")]
    StartFailed { name: ServiceName, message: String },

    #[error("{0}")]
    Failed(String),
}

impl ServiceError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A runtime service managed by a container.
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    async fn start(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn stop(&self) {}

    /// Live view of the service, exposed through runtime attributes.
    fn status(&self) -> ModelNode {
        ModelNode::Undefined
    }
}

/// Where services live. Installing starts the service; removing stops it.
#[async_trait::async_trait]
pub trait ServiceContainer: Send + Sync {
    async fn install(&self, name: ServiceName, service: Arc<dyn Service>) -> Result<(), ServiceError>;

    async fn remove(&self, name: &ServiceName) -> Result<Arc<dyn Service>, ServiceError>;

    fn get(&self, name: &ServiceName) -> Option<Arc<dyn Service>>;

    fn contains(&self, name: &ServiceName) -> bool {
        self.get(name).is_some()
    }

    fn names(&self) -> Vec<ServiceName>;
}

/// In-process container backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryServiceContainer {
    services: DashMap<ServiceName, Arc<dyn Service>>,
}

impl InMemoryServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ServiceContainer for InMemoryServiceContainer {
    async fn install(&self, name: ServiceName, service: Arc<dyn Service>) -> Result<(), ServiceError> {
        if self.services.contains_key(&name) {
            return Err(ServiceError::Duplicate(name));
        }
        service.start().await.map_err(|e| ServiceError::StartFailed {
            name: name.clone(),
            message: e.to_string(),
        })?;
        if self.services.contains_key(&name) {
            service.stop().await;
            return Err(ServiceError::Duplicate(name));
        }
        debug!("Service {} started", name);
        self.services.insert(name, service);
        Ok(())
    }

    async fn remove(&self, name: &ServiceName) -> Result<Arc<dyn Service>, ServiceError> {
        let (_, service) = self
            .services
            .remove(name)
            .ok_or_else(|| ServiceError::NotFound(name.clone()))?;
        service.stop().await;
        debug!("Service {} stopped", name);
        Ok(service)
    }

    fn get(&self, name: &ServiceName) -> Option<Arc<dyn Service>> {
        self.services.get(name).map(|s| s.clone())
    }

    fn names(&self) -> Vec<ServiceName> {
        let mut names: Vec<ServiceName> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// ServiceTarget - the handler's handle, with a compensation journal
// ---------------------------------------------------------------------------

enum ServiceChange {
    Installed(ServiceName),
    Removed(ServiceName, Arc<dyn Service>),
}

/// Service-installation handle exposed to handlers in runtime mode.
///
/// Any call marks the operation as mutating, after which cancellation is no
/// longer honored.
pub struct ServiceTarget {
    container: Arc<dyn ServiceContainer>,
    journal: Vec<ServiceChange>,
    mutating: Arc<AtomicBool>,
}

impl ServiceTarget {
    pub(crate) fn new(container: Arc<dyn ServiceContainer>, mutating: Arc<AtomicBool>) -> Self {
        Self {
            container,
            journal: Vec::new(),
            mutating,
        }
    }

    pub async fn install(&mut self, name: impl Into<ServiceName>, service: Arc<dyn Service>) -> Result<(), ServiceError> {
        let name = name.into();
        self.mutating.store(true, Ordering::SeqCst);
        self.container.install(name.clone(), service).await?;
        self.journal.push(ServiceChange::Installed(name));
        Ok(())
    }

    pub async fn remove(&mut self, name: &ServiceName) -> Result<(), ServiceError> {
        self.mutating.store(true, Ordering::SeqCst);
        let service = self.container.remove(name).await?;
        self.journal.push(ServiceChange::Removed(name.clone(), service));
        Ok(())
    }

    /// Replace a service if present, install it otherwise.
    pub async fn replace(&mut self, name: impl Into<ServiceName>, service: Arc<dyn Service>) -> Result<(), ServiceError> {
        let name = name.into();
        if self.container.contains(&name) {
            self.remove(&name).await?;
        }
        self.install(name, service).await
    }

    pub fn contains(&self, name: &ServiceName) -> bool {
        self.container.contains(name)
    }

    pub fn get(&self, name: &ServiceName) -> Option<Arc<dyn Service>> {
        self.container.get(name)
    }

    /// Number of journaled changes.
    pub fn changes(&self) -> usize {
        self.journal.len()
    }

    /// Undo journaled changes, newest first. Best effort: failures are
    /// logged and the remaining changes are still undone.
    pub(crate) async fn rollback(self) {
        if self.journal.is_empty() {
            return;
        }
        warn!("Rolling back {} service change(s)", self.journal.len());
        for change in self.journal.into_iter().rev() {
            match change {
                ServiceChange::Installed(name) => {
                    if let Err(e) = self.container.remove(&name).await {
                        warn!("Rollback could not remove {}: {}", name, e);
                    }
                }
                ServiceChange::Removed(name, service) => {
                    if let Err(e) = self.container.install(name.clone(), service).await {
                        warn!("Rollback could not reinstall {}: {}", name, e);
                    }
                }
            }
        }
    }
}
