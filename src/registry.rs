//! The authoritative table of managed servers.
//!
//! [`ServerRegistry`] maps server identities to their [`ProcessHandle`]s and
//! bridges to the persisted records. Handles are loaded lazily: the first
//! operation on an identity reads its record from the [`ServerStore`] exactly
//! once, even under concurrent first access.
//!
//! The map itself sits behind a reader-writer lock that is only held for
//! lookups and insertions. Process I/O happens on the handles, each guarded
//! by its own lock, so a slow process never blocks the registry.

use crate::broadcast::{ConsoleBroadcaster, ConsoleSubscription, SubscriberId};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::provision::Provisioner;
use crate::resources::{JarRef, ModPackRef, ResourceResolver};
use crate::server::{OwnerId, ProcessHandle, ServerId, ServerStatus, split_command};
use crate::store::{LaunchConfig, NewServer, ServerRecord, ServerStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::sync::OnceCell;

/// A loaded server: its persisted identity and its process handle
#[derive(Debug)]
pub struct ManagedServer {
    record: ServerRecord,
    handle: ProcessHandle,
}

impl ManagedServer {
    fn new(record: ServerRecord, console_capacity: usize) -> Self {
        let handle = ProcessHandle::new(record.name.clone(), console_capacity);
        Self { record, handle }
    }

    /// Persisted identity
    pub fn record(&self) -> &ServerRecord {
        &self.record
    }

    /// Process handle
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    fn authorize(&self, owner: OwnerId) -> Result<()> {
        if self.record.owner == owner {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "server {} is not owned by user {}",
                self.record.id, owner
            )))
        }
    }
}

/// Parameters of a new server
#[derive(Debug, Clone)]
pub struct CreateServer {
    /// Unique name
    pub name: String,
    /// Root directory
    pub path: PathBuf,
    /// Launch command
    pub command: String,
    /// Server jar to link in
    pub jar: JarRef,
    /// Optional mod pack to link in
    pub mod_pack: Option<ModPackRef>,
    /// Owning user
    pub owner: OwnerId,
}

/// Row of a server listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSummary {
    /// Identity
    pub id: ServerId,
    /// Unique name
    pub name: String,
    /// Root directory
    pub path: PathBuf,
    /// Current status, `Stopped` for servers not loaded yet
    pub status: ServerStatus,
}

/// Full view of one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDetail {
    /// Identity
    pub id: ServerId,
    /// Unique name
    pub name: String,
    /// Root directory
    pub path: PathBuf,
    /// Owning user
    pub owner: OwnerId,
    /// Current status
    pub status: ServerStatus,
    /// Whether a process is alive, including one that was asked to stop
    pub alive: bool,
    /// Exit code of the last process, if it exited with one
    pub last_exit_code: Option<i32>,
    /// Persisted launch configuration
    pub config: LaunchConfig,
}

type Slot = Arc<OnceCell<Arc<ManagedServer>>>;

struct RegistryInner {
    config: Config,
    store: Arc<dyn ServerStore>,
    resources: Arc<dyn ResourceResolver>,
    provisioner: Provisioner,
    broadcaster: Arc<ConsoleBroadcaster>,
    servers: RwLock<HashMap<ServerId, Slot>>,
}

/// Concurrency-safe registry of managed servers.
///
/// Cloning is cheap and every clone shares the same table, so one registry
/// can be created at startup and handed to every collaborator.
#[derive(Clone)]
pub struct ServerRegistry {
    inner: Arc<RegistryInner>,
}

impl ServerRegistry {
    /// Create a registry on top of the given collaborators
    pub fn new(
        config: Config,
        store: Arc<dyn ServerStore>,
        resources: Arc<dyn ResourceResolver>,
    ) -> Self {
        let provisioner = Provisioner::new(&config);
        let broadcaster = Arc::new(ConsoleBroadcaster::new(config.subscriber_capacity));
        Self {
            inner: Arc::new(RegistryInner {
                config,
                store,
                resources,
                provisioner,
                broadcaster,
                servers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registry configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Console broadcaster shared by all servers
    pub fn broadcaster(&self) -> &Arc<ConsoleBroadcaster> {
        &self.inner.broadcaster
    }

    fn read_servers(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<ServerId, Slot>>> {
        self.inner
            .servers
            .read()
            .map_err(|_| Error::Other("Failed to lock server registry".to_string()))
    }

    fn write_servers(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<ServerId, Slot>>> {
        self.inner
            .servers
            .write()
            .map_err(|_| Error::Other("Failed to lock server registry".to_string()))
    }

    /// Return the loaded server, loading it from the store on first access.
    pub async fn get_or_load(&self, id: ServerId) -> Result<Arc<ManagedServer>> {
        let slot = {
            let existing = self.read_servers()?.get(&id).cloned();
            match existing {
                Some(slot) => {
                    if let Some(server) = slot.get() {
                        return Ok(Arc::clone(server));
                    }
                    slot
                }
                None => Arc::clone(self.write_servers()?.entry(id).or_default()),
            }
        };

        let store = Arc::clone(&self.inner.store);
        let capacity = self.inner.config.console_capacity;
        let loaded = slot
            .get_or_try_init(|| async move {
                let record = store
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| Error::NotFound(id.to_string()))?;
                tracing::debug!(server_id = %id, name = %record.name, "Loaded server from store");
                Ok::<_, Error>(Arc::new(ManagedServer::new(record, capacity)))
            })
            .await
            .map(Arc::clone);

        if loaded.is_err() {
            // Don't keep empty slots around for ids that failed to load
            if let Ok(mut servers) = self.write_servers() {
                let stale = servers
                    .get(&id)
                    .is_some_and(|s| Arc::ptr_eq(s, &slot) && !s.initialized());
                if stale {
                    servers.remove(&id);
                }
            }
        }

        loaded
    }

    async fn authorized(&self, id: ServerId, owner: OwnerId) -> Result<Arc<ManagedServer>> {
        let server = self.get_or_load(id).await?;
        server.authorize(owner)?;
        Ok(server)
    }

    async fn launch_config(&self, id: ServerId) -> Result<LaunchConfig> {
        self.inner
            .store
            .config_for(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("launch configuration of server {}", id)))
    }

    async fn resolve_resources(
        &self,
        jar: JarRef,
        mod_pack: Option<ModPackRef>,
    ) -> Result<(PathBuf, Option<PathBuf>)> {
        let jar_path = self.inner.resources.resolve_jar(jar).await?;
        let mod_pack_path = match mod_pack {
            Some(mod_pack) => Some(self.inner.resources.resolve_mod_pack(mod_pack).await?),
            None => None,
        };
        Ok((jar_path, mod_pack_path))
    }

    /// Persist, provision and register a new server.
    ///
    /// If provisioning fails the persisted record is rolled back before the
    /// error is returned.
    #[tracing::instrument(skip(self, request), fields(name = %request.name, owner = %request.owner))]
    pub async fn create(&self, request: CreateServer) -> Result<ServerId> {
        split_command(&request.command)?;

        if self.inner.store.find_by_name(&request.name).await?.is_some() {
            return Err(Error::AlreadyExists(request.name));
        }

        let (jar_path, mod_pack_path) = self.resolve_resources(request.jar, request.mod_pack).await?;

        let record = self
            .inner
            .store
            .create_with_config(
                NewServer {
                    name: request.name.clone(),
                    owner: request.owner,
                    path: request.path.clone(),
                },
                LaunchConfig {
                    command: request.command.clone(),
                    jar: request.jar,
                    mod_pack: request.mod_pack,
                },
            )
            .await?;
        let id = record.id;

        if let Err(e) = self.inner.provisioner.provision(
            &record.path,
            &jar_path,
            mod_pack_path.as_deref(),
            &request.command,
        ) {
            tracing::error!(server_id = %id, error = %e, "Provisioning failed, rolling back server record");
            if let Err(rollback) = self.inner.store.delete(id).await {
                tracing::error!(server_id = %id, error = %rollback, "Failed to roll back server record");
            }
            return Err(e);
        }

        let server = Arc::new(ManagedServer::new(record, self.inner.config.console_capacity));
        self.write_servers()?
            .insert(id, Arc::new(OnceCell::new_with(Some(server))));

        tracing::info!(server_id = %id, "Server created");
        Ok(id)
    }

    /// Start a server and its console broadcaster
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn start(&self, id: ServerId, owner: OwnerId) -> Result<()> {
        let server = self.authorized(id, owner).await?;
        let config = self.launch_config(id).await?;
        let working_dir = self.inner.provisioner.env_dir(&server.record.path);

        let (generation, console) = server
            .handle
            .start_with_console(&working_dir, &config.command)
            .await?;
        self.inner.broadcaster.spawn(id, generation, console);

        tracing::info!(generation, "Server started");
        Ok(())
    }

    /// Ask a server to stop; does not wait for the process to exit
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn stop(&self, id: ServerId, owner: OwnerId) -> Result<()> {
        let server = self.authorized(id, owner).await?;
        server.handle.stop()?;
        tracing::info!("Server stop requested");
        Ok(())
    }

    /// Stop a server, wait for its process to exit, and start it again
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn restart(&self, id: ServerId, owner: OwnerId) -> Result<()> {
        let server = self.authorized(id, owner).await?;
        let config = self.launch_config(id).await?;
        let working_dir = self.inner.provisioner.env_dir(&server.record.path);

        let (generation, console) = server
            .handle
            .restart_with_console(&working_dir, &config.command, self.inner.config.restart_timeout())
            .await?;
        self.inner.broadcaster.spawn(id, generation, console);

        tracing::info!(generation, "Server restarted");
        Ok(())
    }

    /// Write a console command to a running server
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn send_command(&self, id: ServerId, owner: OwnerId, command: &str) -> Result<()> {
        let server = self.authorized(id, owner).await?;
        server.handle.send_command(command).await
    }

    /// Delete a stopped server from the store and the registry.
    ///
    /// The handle is retired before the record is removed, so a start racing
    /// with the deletion fails instead of leaving an unreachable process.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn delete(&self, id: ServerId, owner: OwnerId) -> Result<()> {
        let server = self.authorized(id, owner).await?;
        server.handle.retire()?;

        if let Err(e) = self.inner.store.delete(id).await {
            server.handle.reinstate();
            return Err(e);
        }
        self.write_servers()?.remove(&id);
        self.inner.broadcaster.remove(id);

        tracing::info!("Server deleted");
        Ok(())
    }

    /// Persisted servers of `owner`, whether loaded or not
    #[tracing::instrument(skip(self))]
    pub async fn list(&self, owner: OwnerId) -> Result<Vec<ServerSummary>> {
        let records = self.inner.store.list_by_owner(owner).await?;
        let servers = self.read_servers()?;

        Ok(records
            .into_iter()
            .map(|record| {
                let status = servers
                    .get(&record.id)
                    .and_then(|slot| slot.get())
                    .map(|server| server.handle.status())
                    .unwrap_or(ServerStatus::Stopped);
                ServerSummary {
                    id: record.id,
                    name: record.name,
                    path: record.path,
                    status,
                }
            })
            .collect())
    }

    /// Details of one server
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn get(&self, id: ServerId, owner: OwnerId) -> Result<ServerDetail> {
        let server = self.authorized(id, owner).await?;
        let config = self.launch_config(id).await?;

        Ok(ServerDetail {
            id,
            name: server.record.name.clone(),
            path: server.record.path.clone(),
            owner: server.record.owner,
            status: server.handle.status(),
            alive: server.handle.is_alive(),
            last_exit_code: server.handle.last_exit().and_then(|exit| exit.code),
            config,
        })
    }

    /// Replace the launch command; used from the next start on
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn update_command(&self, id: ServerId, owner: OwnerId, command: &str) -> Result<()> {
        split_command(command)?;
        let server = self.authorized(id, owner).await?;

        self.inner.store.update_command(id, command).await?;
        self.inner
            .provisioner
            .write_launch_script(&server.record.path, command)?;

        tracing::info!("Server command updated");
        Ok(())
    }

    /// Re-run provisioning of an existing server
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn provision(&self, id: ServerId, owner: OwnerId) -> Result<PathBuf> {
        let server = self.authorized(id, owner).await?;
        let config = self.launch_config(id).await?;
        let (jar_path, mod_pack_path) = self.resolve_resources(config.jar, config.mod_pack).await?;

        self.inner.provisioner.provision(
            &server.record.path,
            &jar_path,
            mod_pack_path.as_deref(),
            &config.command,
        )
    }

    /// Working directory of a server
    pub async fn working_dir(&self, id: ServerId) -> Result<PathBuf> {
        let server = self.get_or_load(id).await?;
        Ok(self.inner.provisioner.env_dir(&server.record.path))
    }

    /// Subscribe to the live console of a server.
    ///
    /// While the server is stopped or stopping, the subscription follows the
    /// next start instead of closing with the exiting process.
    pub async fn subscribe(&self, id: ServerId) -> Result<ConsoleSubscription> {
        let server = self.get_or_load(id).await?;
        let generation = server.handle.console_generation();
        Ok(self.inner.broadcaster.subscribe_from(id, generation))
    }

    /// Drop a console subscription; unknown subscriptions are ignored
    pub fn unsubscribe(&self, id: ServerId, subscriber: SubscriberId) -> bool {
        self.inner.broadcaster.unsubscribe(id, subscriber)
    }

    /// Stop every running server and wait for the processes to exit.
    ///
    /// Processes still alive after the restart timeout are left running
    /// and logged.
    pub async fn shutdown(&self) {
        let servers: Vec<Arc<ManagedServer>> = match self.read_servers() {
            Ok(servers) => servers.values().filter_map(|slot| slot.get().cloned()).collect(),
            Err(e) => {
                tracing::error!(error = %e, "Cannot shut down servers");
                return;
            }
        };

        let timeout = self.inner.config.restart_timeout();
        for server in servers.iter().filter(|s| s.handle.is_running()) {
            if let Err(e) = server.handle.stop() {
                tracing::warn!(server_id = %server.record.id, error = %e, "Failed to stop server");
            }
        }

        for server in servers.iter().filter(|s| s.handle.is_alive()) {
            if tokio::time::timeout(timeout, server.handle.wait_for_exit()).await.is_err() {
                tracing::warn!(server_id = %server.record.id, "Server still running after shutdown timeout");
            }
        }

        tracing::info!(servers = servers.len(), "Registry shut down");
    }

    /// Whether a server is loaded in memory
    pub fn is_loaded(&self, id: ServerId) -> bool {
        self.read_servers()
            .map(|servers| servers.get(&id).is_some_and(|slot| slot.initialized()))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

