use async_trait::async_trait;
use gameserver_runner::config::Config;
use gameserver_runner::error::{Error, Result};
use gameserver_runner::registry::{CreateServer, ServerRegistry};
use gameserver_runner::resources::{JarRef, ModPackRef, ResourceCatalog};
use gameserver_runner::server::{OwnerId, ServerId};
use gameserver_runner::store::{JsonStore, LaunchConfig, NewServer, ServerRecord, ServerStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub const WAIT: Duration = Duration::from_secs(10);
pub const OWNER: OwnerId = OwnerId(7);
pub const STRANGER: OwnerId = OwnerId(8);
pub const JAR: JarRef = JarRef(1);
pub const MODS: ModPackRef = ModPackRef(1);

pub fn test_config() -> Config {
    Config {
        restart_timeout_secs: 5,
        ..Config::default()
    }
}

/// A registry over an in-memory store, with one jar and one mod pack
/// uploaded into a temporary directory.
pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<JsonStore>,
    pub resources: Arc<ResourceCatalog>,
    pub registry: ServerRegistry,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let jar = dir.path().join("common/jar_files/paper.jar");
        std::fs::create_dir_all(jar.parent().unwrap()).unwrap();
        std::fs::write(&jar, b"not really a jar").unwrap();

        let mods = dir.path().join("common/mod_packs/create");
        std::fs::create_dir_all(&mods).unwrap();

        let resources = Arc::new(ResourceCatalog::new());
        resources.register_jar(JAR, &jar).unwrap();
        resources.register_mod_pack(MODS, &mods).unwrap();

        let store = Arc::new(JsonStore::in_memory());
        let registry = ServerRegistry::new(test_config(), store.clone(), resources.clone());

        Self {
            dir,
            store,
            resources,
            registry,
        }
    }

    /// A second registry sharing this fixture's store and resources,
    /// as after a supervisor restart
    pub fn fresh_registry(&self) -> ServerRegistry {
        ServerRegistry::new(test_config(), self.store.clone(), self.resources.clone())
    }

    /// A registry over another store, sharing this fixture's resources
    pub fn registry_over(&self, store: Arc<dyn ServerStore>) -> ServerRegistry {
        ServerRegistry::new(test_config(), store, self.resources.clone())
    }

    pub fn jar_path(&self) -> PathBuf {
        self.dir.path().join("common/jar_files/paper.jar")
    }

    pub fn mods_path(&self) -> PathBuf {
        self.dir.path().join("common/mod_packs/create")
    }

    pub fn server_root(&self, name: &str) -> PathBuf {
        self.dir.path().join("game_servers").join(name)
    }

    pub fn request(&self, name: &str, command: &str) -> CreateServer {
        CreateServer {
            name: name.to_string(),
            path: self.server_root(name),
            command: command.to_string(),
            jar: JAR,
            mod_pack: None,
            owner: OWNER,
        }
    }

    /// Write an executable shell script and return its absolute path
    #[cfg(unix)]
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        write_script(self.dir.path(), name, body)
    }
}

#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Wraps a `JsonStore` with deletions that are slow and can be made to fail
pub struct SlowDeleteStore {
    inner: Arc<JsonStore>,
    delay: Duration,
    fail: AtomicBool,
}

impl SlowDeleteStore {
    pub fn new(inner: Arc<JsonStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServerStore for SlowDeleteStore {
    async fn find_by_id(&self, id: ServerId) -> Result<Option<ServerRecord>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ServerRecord>> {
        self.inner.find_by_name(name).await
    }

    async fn create_with_config(&self, server: NewServer, config: LaunchConfig) -> Result<ServerRecord> {
        self.inner.create_with_config(server, config).await
    }

    async fn config_for(&self, id: ServerId) -> Result<Option<LaunchConfig>> {
        self.inner.config_for(id).await
    }

    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<ServerRecord>> {
        self.inner.list_by_owner(owner).await
    }

    async fn update_command(&self, id: ServerId, command: &str) -> Result<()> {
        self.inner.update_command(id, command).await
    }

    async fn delete(&self, id: ServerId) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::PersistenceFailed("database is locked".to_string()));
        }
        self.inner.delete(id).await
    }
}
