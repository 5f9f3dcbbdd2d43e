use super::support::{Fixture, OWNER, test_config};
use async_trait::async_trait;
use gameserver_runner::error::{Error, Result};
use gameserver_runner::registry::ServerRegistry;
use gameserver_runner::server::{OwnerId, ServerId};
use gameserver_runner::store::{LaunchConfig, NewServer, ServerRecord, ServerStore};
use mockall::mock;
use mockall::predicate::*;
use std::path::PathBuf;
use std::sync::Arc;

// Define a mock for the ServerStore trait
mock! {
    pub StoreMock {}

    #[async_trait]
    impl ServerStore for StoreMock {
        async fn find_by_id(&self, id: ServerId) -> Result<Option<ServerRecord>>;
        async fn find_by_name(&self, name: &str) -> Result<Option<ServerRecord>>;
        async fn create_with_config(&self, server: NewServer, config: LaunchConfig) -> Result<ServerRecord>;
        async fn config_for(&self, id: ServerId) -> Result<Option<LaunchConfig>>;
        async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<ServerRecord>>;
        async fn update_command(&self, id: ServerId, command: &str) -> Result<()>;
        async fn delete(&self, id: ServerId) -> Result<()>;
    }
}

// Helper function to build a registry over a mock store, reusing the
// fixture's resources
fn registry_with(fixture: &Fixture, store: MockStoreMock) -> ServerRegistry {
    ServerRegistry::new(test_config(), Arc::new(store), fixture.resources.clone())
}

fn record(id: u32, name: &str, path: PathBuf) -> ServerRecord {
    ServerRecord {
        id: ServerId(id),
        name: name.to_string(),
        owner: OWNER,
        path,
    }
}

#[tokio::test]
async fn test_persistence_failure_skips_provisioning() {
    let fixture = Fixture::new();
    let mut store = MockStoreMock::new();
    store.expect_find_by_name().returning(|_| Ok(None));
    store
        .expect_create_with_config()
        .times(1)
        .returning(|_, _| Err(Error::PersistenceFailed("disk full".to_string())));
    store.expect_delete().never();

    let registry = registry_with(&fixture, store);
    let result = registry.create(fixture.request("survival", "cat")).await;

    assert!(matches!(result, Err(Error::PersistenceFailed(_))));
    assert!(!fixture.server_root("survival").exists());
}

#[tokio::test]
async fn test_provisioning_failure_deletes_record() {
    let fixture = Fixture::new();
    let root = fixture.server_root("blocked");
    std::fs::create_dir_all(root.parent().unwrap()).unwrap();
    std::fs::write(&root, b"in the way").unwrap();

    let mut store = MockStoreMock::new();
    store.expect_find_by_name().returning(|_| Ok(None));
    let path = root.clone();
    store
        .expect_create_with_config()
        .times(1)
        .returning(move |server, _| Ok(record(5, &server.name, path.clone())));
    store
        .expect_delete()
        .with(eq(ServerId(5)))
        .times(1)
        .returning(|_| Ok(()));

    let registry = registry_with(&fixture, store);
    let result = registry.create(fixture.request("blocked", "cat")).await;

    assert!(matches!(result, Err(Error::ProvisionFailed(_))));
    assert!(!registry.is_loaded(ServerId(5)));
}

#[tokio::test]
async fn test_failed_rollback_still_reports_provisioning_error() {
    let fixture = Fixture::new();
    let root = fixture.server_root("blocked");
    std::fs::create_dir_all(root.parent().unwrap()).unwrap();
    std::fs::write(&root, b"in the way").unwrap();

    let mut store = MockStoreMock::new();
    store.expect_find_by_name().returning(|_| Ok(None));
    let path = root.clone();
    store
        .expect_create_with_config()
        .returning(move |server, _| Ok(record(6, &server.name, path.clone())));
    store
        .expect_delete()
        .times(1)
        .returning(|_| Err(Error::PersistenceFailed("connection reset".to_string())));

    let registry = registry_with(&fixture, store);
    let result = registry.create(fixture.request("blocked", "cat")).await;

    assert!(matches!(result, Err(Error::ProvisionFailed(_))));
}

#[tokio::test]
async fn test_concurrent_first_access_loads_once() -> Result<()> {
    let fixture = Fixture::new();
    let root = fixture.server_root("lobby");

    let mut store = MockStoreMock::new();
    store
        .expect_find_by_id()
        .with(eq(ServerId(3)))
        .times(1)
        .returning(move |id| Ok(Some(record(id.0, "lobby", root.clone()))));

    let registry = registry_with(&fixture, store);
    let loads: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_load(ServerId(3)).await })
        })
        .collect();

    let mut servers = Vec::new();
    for load in loads {
        servers.push(load.await.unwrap()?);
    }

    assert!(servers.iter().all(|s| Arc::ptr_eq(s, &servers[0])));
    assert_eq!(servers[0].record().name, "lobby");
    Ok(())
}

#[tokio::test]
async fn test_missing_record_is_not_cached() {
    let fixture = Fixture::new();
    let mut store = MockStoreMock::new();
    store
        .expect_find_by_id()
        .with(eq(ServerId(9)))
        .times(2)
        .returning(|_| Ok(None));

    let registry = registry_with(&fixture, store);

    assert!(matches!(registry.get_or_load(ServerId(9)).await, Err(Error::NotFound(_))));
    assert!(!registry.is_loaded(ServerId(9)));
    assert!(matches!(registry.get_or_load(ServerId(9)).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_store_errors_propagate() {
    let fixture = Fixture::new();
    let mut store = MockStoreMock::new();
    store
        .expect_list_by_owner()
        .with(eq(OWNER))
        .returning(|_| Err(Error::PersistenceFailed("timeout".to_string())));

    let registry = registry_with(&fixture, store);
    let result = registry.list(OWNER).await;

    assert!(matches!(result, Err(Error::PersistenceFailed(_))));
    assert_eq!(result.unwrap_err().status_code(), 500);
}
