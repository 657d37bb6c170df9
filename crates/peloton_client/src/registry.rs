//! Name → factory table for the available adapters.
//!
//! The process-wide registry is built once on first use and never mutated
//! afterwards. Tests that need their own table should build a local
//! [`ClientRegistry`] instead of going through [`global`].

use crate::config::Endpoints;
use crate::{Credentials, PelotonClient, oauth, session};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Builds an adapter from resolved credentials.
pub type ClientFactory = fn(Credentials, &Endpoints) -> Box<dyn PelotonClient>;

/// Adapter used when `--client` is not given.
pub const DEFAULT_CLIENT: &str = oauth::NAME;

#[derive(Debug, Error)]
#[error("unknown client '{name}'. Available: {}", .available.join(", "))]
pub struct UnknownClient {
    pub name: String,
    pub available: Vec<&'static str>,
}

#[derive(Debug)]
pub struct ClientRegistry {
    factories: BTreeMap<&'static str, ClientFactory>,
    endpoints: Endpoints,
}

impl ClientRegistry {
    /// Empty registry; adapters it creates talk to `endpoints`.
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            factories: BTreeMap::new(),
            endpoints,
        }
    }

    /// Registry holding every built-in adapter.
    pub fn builtin(endpoints: Endpoints) -> Self {
        let mut registry = Self::new(endpoints);
        registry.register(oauth::NAME, oauth::factory);
        registry.register(session::NAME, session::factory);
        debug!(
            clients = %registry.names().join(", "),
            api = %registry.endpoints.api_base_url,
            "client registry initialized"
        );
        registry
    }

    /// Add an adapter under `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered.
    pub fn register(&mut self, name: &'static str, factory: ClientFactory) {
        let previous = self.factories.insert(name, factory);
        assert!(
            previous.is_none(),
            "client adapter `{name}` registered twice"
        );
    }

    /// Registered adapter names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build the adapter registered under `name`.
    pub fn create(
        &self,
        name: &str,
        credentials: Credentials,
    ) -> Result<Box<dyn PelotonClient>, UnknownClient> {
        let factory = self.factories.get(name).ok_or_else(|| UnknownClient {
            name: name.to_string(),
            available: self.names(),
        })?;
        debug!(client = name, "creating client adapter");
        Ok(factory(credentials, &self.endpoints))
    }
}

static REGISTRY: OnceLock<ClientRegistry> = OnceLock::new();

/// The process-wide registry of built-in adapters.
///
/// Endpoints are read from the environment the first time this is called.
pub fn global() -> &'static ClientRegistry {
    REGISTRY.get_or_init(|| ClientRegistry::builtin(Endpoints::from_env()))
}
