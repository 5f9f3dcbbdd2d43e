//! Persistence contract for managed servers.
//!
//! The supervisor never owns the source of truth for server records; it
//! reads them through [`ServerStore`] and lazily rebuilds in-memory state
//! from them. [`JsonStore`] is a small implementation keeping the table in
//! memory, optionally mirrored to a JSON file.

use crate::error::{Error, Result};
use crate::resources::{JarRef, ModPackRef};
use crate::server::{OwnerId, ServerId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Persisted identity of a managed server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Assigned identity
    pub id: ServerId,
    /// Unique name
    pub name: String,
    /// Owning user
    pub owner: OwnerId,
    /// Root directory of the server
    pub path: PathBuf,
}

/// A server record that has not been assigned an identity yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewServer {
    /// Unique name
    pub name: String,
    /// Owning user
    pub owner: OwnerId,
    /// Root directory of the server
    pub path: PathBuf,
}

/// Launch configuration persisted alongside a server record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Command line used to start the server
    pub command: String,
    /// Server jar
    pub jar: JarRef,
    /// Optional mod pack
    pub mod_pack: Option<ModPackRef>,
}

/// Persisted-server lookup/create/update/delete contract
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Look up a server by identity
    async fn find_by_id(&self, id: ServerId) -> Result<Option<ServerRecord>>;

    /// Look up a server by unique name
    async fn find_by_name(&self, name: &str) -> Result<Option<ServerRecord>>;

    /// Persist a server and its launch configuration as one unit.
    ///
    /// Either both are stored or neither is. Fails with `AlreadyExists` when
    /// the name is taken.
    async fn create_with_config(&self, server: NewServer, config: LaunchConfig) -> Result<ServerRecord>;

    /// Launch configuration of a server
    async fn config_for(&self, id: ServerId) -> Result<Option<LaunchConfig>>;

    /// All servers owned by `owner`
    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<ServerRecord>>;

    /// Replace the launch command of a server
    async fn update_command(&self, id: ServerId, command: &str) -> Result<()>;

    /// Remove a server and its configuration
    async fn delete(&self, id: ServerId) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredServer {
    record: ServerRecord,
    config: LaunchConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Table {
    next_id: u32,
    servers: Vec<StoredServer>,
}

impl Table {
    fn position(&self, id: ServerId) -> Option<usize> {
        self.servers.iter().position(|s| s.record.id == id)
    }
}

/// Server table kept in memory and optionally mirrored to a JSON file.
///
/// Every mutation is applied to a copy, written to disk, and only then
/// committed in memory, so a failed write leaves both sides unchanged.
#[derive(Debug, Default)]
pub struct JsonStore {
    path: Option<PathBuf>,
    table: RwLock<Table>,
}

impl JsonStore {
    /// A store that lives only as long as the process
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or create on first write) a store backed by `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let table = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::PersistenceFailed(format!("Failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Table::default(),
            Err(e) => {
                return Err(Error::PersistenceFailed(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        tracing::debug!(path = %path.display(), "Opened server store");
        Ok(Self {
            path: Some(path),
            table: RwLock::new(table),
        })
    }

    async fn flush(&self, table: &Table) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec_pretty(table)
            .map_err(|e| Error::PersistenceFailed(format!("Failed to serialize server table: {}", e)))?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::PersistenceFailed(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::PersistenceFailed(format!("Failed to replace {}: {}", path.display(), e)))?;

        Ok(())
    }
}

#[async_trait]
impl ServerStore for JsonStore {
    async fn find_by_id(&self, id: ServerId) -> Result<Option<ServerRecord>> {
        let table = self.table.read().await;
        Ok(table.position(id).map(|i| table.servers[i].record.clone()))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ServerRecord>> {
        let table = self.table.read().await;
        Ok(table
            .servers
            .iter()
            .find(|s| s.record.name == name)
            .map(|s| s.record.clone()))
    }

    async fn create_with_config(&self, server: NewServer, config: LaunchConfig) -> Result<ServerRecord> {
        let mut table = self.table.write().await;
        if table.servers.iter().any(|s| s.record.name == server.name) {
            return Err(Error::AlreadyExists(server.name));
        }

        let mut next = table.clone();
        next.next_id = next.next_id.max(1);
        let record = ServerRecord {
            id: ServerId(next.next_id),
            name: server.name,
            owner: server.owner,
            path: server.path,
        };
        next.next_id += 1;
        next.servers.push(StoredServer {
            record: record.clone(),
            config,
        });

        self.flush(&next).await?;
        *table = next;
        Ok(record)
    }

    async fn config_for(&self, id: ServerId) -> Result<Option<LaunchConfig>> {
        let table = self.table.read().await;
        Ok(table.position(id).map(|i| table.servers[i].config.clone()))
    }

    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<ServerRecord>> {
        let table = self.table.read().await;
        Ok(table
            .servers
            .iter()
            .filter(|s| s.record.owner == owner)
            .map(|s| s.record.clone())
            .collect())
    }

    async fn update_command(&self, id: ServerId, command: &str) -> Result<()> {
        let mut table = self.table.write().await;
        let index = table
            .position(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let mut next = table.clone();
        next.servers[index].config.command = command.to_string();

        self.flush(&next).await?;
        *table = next;
        Ok(())
    }

    async fn delete(&self, id: ServerId) -> Result<()> {
        let mut table = self.table.write().await;
        let index = table
            .position(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let mut next = table.clone();
        next.servers.remove(index);

        self.flush(&next).await?;
        *table = next;
        Ok(())
    }
}
