//! Resolution of shared jar and mod-pack resources.
//!
//! Uploaded resources are immutable files shared by many servers. The
//! supervisor only needs to turn a reference into a path it can link to.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::RwLock;

/// Reference to an uploaded server jar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JarRef(pub u32);

/// Reference to an uploaded mod pack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModPackRef(pub u32);

impl fmt::Display for JarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "jar#{}", self.0)
    }
}

impl fmt::Display for ModPackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mod-pack#{}", self.0)
    }
}

/// Resolves resource references to filesystem paths
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    /// Path of the jar file
    async fn resolve_jar(&self, jar: JarRef) -> Result<PathBuf>;

    /// Path of the mod pack
    async fn resolve_mod_pack(&self, mod_pack: ModPackRef) -> Result<PathBuf>;
}

/// In-memory resource table
#[derive(Debug, Default)]
pub struct ResourceCatalog {
    jars: RwLock<HashMap<JarRef, PathBuf>>,
    mod_packs: RwLock<HashMap<ModPackRef, PathBuf>>,
}

impl ResourceCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a jar file
    pub fn register_jar(&self, jar: JarRef, path: impl Into<PathBuf>) -> Result<()> {
        self.jars
            .write()
            .map_err(|_| Error::Other("Failed to lock jar catalog".to_string()))?
            .insert(jar, path.into());
        Ok(())
    }

    /// Register (or replace) a mod pack
    pub fn register_mod_pack(&self, mod_pack: ModPackRef, path: impl Into<PathBuf>) -> Result<()> {
        self.mod_packs
            .write()
            .map_err(|_| Error::Other("Failed to lock mod pack catalog".to_string()))?
            .insert(mod_pack, path.into());
        Ok(())
    }
}

#[async_trait]
impl ResourceResolver for ResourceCatalog {
    async fn resolve_jar(&self, jar: JarRef) -> Result<PathBuf> {
        self.jars
            .read()
            .map_err(|_| Error::Other("Failed to lock jar catalog".to_string()))?
            .get(&jar)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound(jar.to_string()))
    }

    async fn resolve_mod_pack(&self, mod_pack: ModPackRef) -> Result<PathBuf> {
        self.mod_packs
            .read()
            .map_err(|_| Error::Other("Failed to lock mod pack catalog".to_string()))?
            .get(&mod_pack)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound(mod_pack.to_string()))
    }
}
