//! The resource manager and the registry that shares it between ingestion clients
//!
//! A resource manager runs background maintenance to discover staging endpoints and rotate
//! credentials, which is expensive enough that a process should run it once per service. The
//! [`ManagerRegistry`] is owned by the application and handed to every ingestion client; it
//! creates one manager per service endpoint on first use and never tears it down.
use std::{collections::HashMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use kusto_client::Client;
use observability_deps::tracing::info;
use parking_lot::RwLock;

use crate::{
    error::{Op, Result},
    lazy::LazyOnce,
    properties::AuthContext,
};

#[async_trait]
pub trait ResourceManager: Debug + Send + Sync + 'static {
    /// Fresh authorization material to stamp onto an ingestion
    async fn auth_context(&self) -> Result<AuthContext>;
}

/// A manager that always hands out the same authorization context
#[derive(Debug, Clone)]
pub struct StaticAuthManager {
    auth: AuthContext,
}

impl StaticAuthManager {
    pub fn new(auth: AuthContext) -> Self {
        Self { auth }
    }
}

#[async_trait]
impl ResourceManager for StaticAuthManager {
    async fn auth_context(&self) -> Result<AuthContext> {
        Ok(self.auth.clone())
    }
}

/// Creates the manager for the service a [`Client`] points at
pub type ManagerFactory =
    dyn Fn(&Client) -> Result<Arc<dyn ResourceManager>> + Send + Sync + 'static;

type ManagerSlot = Arc<LazyOnce<Arc<dyn ResourceManager>>>;

pub struct ManagerRegistry {
    factory: Box<ManagerFactory>,
    managers: RwLock<HashMap<String, ManagerSlot>>,
}

impl Debug for ManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let endpoints: Vec<String> = self.managers.read().keys().cloned().collect();
        f.debug_struct("ManagerRegistry")
            .field("endpoints", &endpoints)
            .finish_non_exhaustive()
    }
}

impl ManagerRegistry {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&Client) -> Result<Arc<dyn ResourceManager>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            managers: Default::default(),
        }
    }

    /// The manager for the endpoint of `client`, created from `client` if this is the first
    /// request for that endpoint
    ///
    /// Later calls for the same endpoint ignore the client they are given.
    pub fn get_manager(&self, client: &Client) -> Result<Arc<dyn ResourceManager>> {
        let endpoint = client.endpoint().as_str();
        let slot = self.slot(endpoint);
        slot.get_or_try_init(|| {
            info!(%endpoint, "creating resource manager");
            (self.factory)(client).map_err(|e| e.with_op(Op::ManagerInit))
        })
        .map(Arc::clone)
    }

    fn slot(&self, endpoint: &str) -> ManagerSlot {
        if let Some(slot) = self.managers.read().get(endpoint) {
            return Arc::clone(slot);
        }
        let mut managers = self.managers.write();
        Arc::clone(
            managers
                .entry(endpoint.to_string())
                .or_insert_with(|| Arc::new(LazyOnce::new())),
        )
    }
}
