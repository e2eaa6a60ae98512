//! Application record lookup.
//!
//! Durable storage of application records is an external concern; the core
//! only needs a lookup capability. The in-memory store below is what the
//! server feeds from its configuration file.

use std::sync::Arc;

use dashmap::DashMap;

use crate::app::App;
use crate::error::Error;

/// Lookup capability for application records.
pub trait AppStore: Send + Sync {
    /// Look up an application by its external identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppNotFound` for unknown identifiers.
    fn app_by_id(&self, app_id: &str) -> Result<Arc<App>, Error>;
}

/// In-memory application store.
#[derive(Debug, Default)]
pub struct MemoryAppStore {
    apps: DashMap<String, Arc<App>>,
}

impl MemoryAppStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application, replacing any previous record with the same
    /// identifier.
    pub fn insert(&self, app: App) -> Arc<App> {
        let app = Arc::new(app);
        self.apps.insert(app.app_id().to_string(), Arc::clone(&app));
        app
    }

    /// Number of registered applications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    /// Whether no applications are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

impl AppStore for MemoryAppStore {
    fn app_by_id(&self, app_id: &str) -> Result<Arc<App>, Error> {
        self.apps
            .get(app_id)
            .map(|app| Arc::clone(&app))
            .ok_or_else(|| Error::AppNotFound(app_id.to_string()))
    }
}
