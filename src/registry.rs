//! # Transform Registry
//!
//! Registry mapping stable job names to [`Transform`] implementations,
//! resolved at call time. This is the capability seam that replaces any
//! notion of resolving user code by reflection: an orchestrator invocation
//! carries an opaque string reference and the registry either produces a
//! registered, invokable transform or fails fast before any job state is
//! created.
//!
//! ## Usage
//!
//! ```rust
//! use migrator_core::registry::TransformRegistry;
//! use migrator_core::transform::{FnTransform, Record};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = TransformRegistry::new();
//! registry
//!     .register("set-default", Arc::new(FnTransform::new(|_r: &Record| Ok(None))))
//!     .await?;
//!
//! let transform = registry.resolve("set-default").await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{MigratorError, Result};
use crate::transform::Transform;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Statistics about registered transforms
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub total_transforms: usize,
    pub names: Vec<String>,
}

/// Thread-safe name -> transform map with call-time resolution.
pub struct TransformRegistry {
    transforms: Arc<RwLock<HashMap<String, Arc<dyn Transform>>>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self {
            transforms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a transform under a stable job name. Re-registering a name
    /// replaces the previous transform.
    pub async fn register<S: Into<String>>(
        &self,
        name: S,
        transform: Arc<dyn Transform>,
    ) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(MigratorError::Configuration(
                "Transform name cannot be empty".to_string(),
            ));
        }

        let mut transforms = self.transforms.write().await;
        let replaced = transforms.insert(name.clone(), transform).is_some();
        info!(name = %name, replaced = replaced, "Registered transform");
        Ok(())
    }

    /// Resolve an opaque transform reference to an invokable transform.
    pub async fn resolve(&self, transform_ref: &str) -> Result<Arc<dyn Transform>> {
        debug!(transform_ref = %transform_ref, "Resolving transform");
        let transforms = self.transforms.read().await;
        transforms
            .get(transform_ref)
            .cloned()
            .ok_or_else(|| MigratorError::TransformNotFound {
                transform_ref: transform_ref.to_string(),
            })
    }

    pub async fn contains(&self, transform_ref: &str) -> bool {
        let transforms = self.transforms.read().await;
        transforms.contains_key(transform_ref)
    }

    /// Registered names, sorted for stable display.
    pub async fn names(&self) -> Vec<String> {
        let transforms = self.transforms.read().await;
        let mut names: Vec<String> = transforms.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn stats(&self) -> RegistryStats {
        let names = self.names().await;
        RegistryStats {
            total_transforms: names.len(),
            names,
        }
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for TransformRegistry {
    fn clone(&self) -> Self {
        Self {
            transforms: Arc::clone(&self.transforms),
        }
    }
}
