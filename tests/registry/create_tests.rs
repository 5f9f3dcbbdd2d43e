use super::support::{Fixture, JAR, MODS, OWNER, STRANGER};
use gameserver_runner::error::{Error, Result};
use gameserver_runner::resources::{JarRef, ModPackRef};
use gameserver_runner::server::{ServerId, ServerStatus};
use gameserver_runner::store::ServerStore;
use std::fs;

#[tokio::test]
async fn test_create_provisions_environment() -> Result<()> {
    let fixture = Fixture::new();
    let mut request = fixture.request("survival", "java -Xmx2G -jar server.jar nogui");
    request.mod_pack = Some(MODS);

    let id = fixture.registry.create(request).await?;

    let env = fixture.server_root("survival").join("env");
    assert_eq!(fs::read_link(env.join("server.jar")).unwrap(), fixture.jar_path());
    assert_eq!(fs::read_link(env.join("mods")).unwrap(), fixture.mods_path());
    assert_eq!(
        fs::read_to_string(env.join("start.sh")).unwrap(),
        "#!/bin/bash\njava -Xmx2G -jar server.jar nogui\n"
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(env.join("start.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    assert_eq!(fixture.registry.working_dir(id).await?, env);
    assert!(fixture.registry.is_loaded(id));

    let config = fixture.store.config_for(id).await?.unwrap();
    assert_eq!(config.jar, JAR);
    assert_eq!(config.mod_pack, Some(MODS));
    Ok(())
}

#[tokio::test]
async fn test_create_duplicate_name_is_rejected() -> Result<()> {
    let fixture = Fixture::new();
    fixture.registry.create(fixture.request("lobby", "cat")).await?;

    let mut again = fixture.request("lobby", "cat");
    again.path = fixture.server_root("lobby-2");
    let result = fixture.registry.create(again).await;

    assert!(matches!(result, Err(Error::AlreadyExists(name)) if name == "lobby"));
    assert_eq!(fixture.store.list_by_owner(OWNER).await?.len(), 1);
    assert!(!fixture.server_root("lobby-2").exists());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_create_persists_once() -> Result<()> {
    let fixture = Fixture::new();
    let first = fixture.registry.clone();
    let second = fixture.registry.clone();

    let (a, b) = tokio::join!(
        first.create(fixture.request("race", "cat")),
        second.create(fixture.request("race", "cat")),
    );

    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    assert!(matches!(a.err().or(b.err()), Some(Error::AlreadyExists(_))));
    assert_eq!(fixture.store.list_by_owner(OWNER).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_blank_command() -> Result<()> {
    let fixture = Fixture::new();

    let result = fixture.registry.create(fixture.request("empty", "   ")).await;

    assert!(matches!(result, Err(Error::InvalidCommand(_))));
    assert!(fixture.store.find_by_name("empty").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_create_with_unknown_resources() -> Result<()> {
    let fixture = Fixture::new();

    let mut request = fixture.request("nojar", "cat");
    request.jar = JarRef(404);
    let result = fixture.registry.create(request).await;
    assert!(matches!(result, Err(Error::ResourceNotFound(_))));

    let mut request = fixture.request("nomods", "cat");
    request.mod_pack = Some(ModPackRef(404));
    let result = fixture.registry.create(request).await;
    assert!(matches!(result, Err(Error::ResourceNotFound(_))));

    assert!(fixture.store.list_by_owner(OWNER).await?.is_empty());
    assert!(!fixture.server_root("nojar").exists());
    Ok(())
}

#[tokio::test]
async fn test_provisioning_failure_rolls_back_record() -> Result<()> {
    let fixture = Fixture::new();
    // A plain file where the server root should be
    fs::create_dir_all(fixture.server_root("blocked").parent().unwrap()).unwrap();
    fs::write(fixture.server_root("blocked"), b"in the way").unwrap();

    let result = fixture.registry.create(fixture.request("blocked", "cat")).await;

    assert!(matches!(result, Err(Error::ProvisionFailed(_))));
    assert!(fixture.store.find_by_name("blocked").await?.is_none());
    assert!(!fixture.registry.is_loaded(ServerId(1)));

    // The name is free again
    let mut retry = fixture.request("blocked", "cat");
    retry.path = fixture.server_root("unblocked");
    fixture.registry.create(retry).await?;
    Ok(())
}

#[tokio::test]
async fn test_list_is_scoped_to_owner() -> Result<()> {
    let fixture = Fixture::new();
    let survival = fixture.registry.create(fixture.request("survival", "cat")).await?;
    let creative = fixture.registry.create(fixture.request("creative", "cat")).await?;
    let mut other = fixture.request("other", "cat");
    other.owner = STRANGER;
    fixture.registry.create(other).await?;

    let mut servers = fixture.registry.list(OWNER).await?;
    servers.sort_by_key(|s| s.id);

    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0].id, survival);
    assert_eq!(servers[0].name, "survival");
    assert_eq!(servers[1].id, creative);
    assert!(servers.iter().all(|s| s.status == ServerStatus::Stopped));

    // Unloaded servers are listed too
    let fresh = fixture.fresh_registry();
    assert_eq!(fresh.list(OWNER).await?.len(), 2);
    assert!(!fresh.is_loaded(survival));

    assert_eq!(fixture.registry.list(STRANGER).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_get_checks_ownership() -> Result<()> {
    let fixture = Fixture::new();
    let id = fixture
        .registry
        .create(fixture.request("skyblock", "java -jar server.jar"))
        .await?;

    let detail = fixture.registry.get(id, OWNER).await?;
    assert_eq!(detail.name, "skyblock");
    assert_eq!(detail.owner, OWNER);
    assert_eq!(detail.status, ServerStatus::Stopped);
    assert!(!detail.alive);
    assert_eq!(detail.last_exit_code, None);
    assert_eq!(detail.config.command, "java -jar server.jar");

    let forbidden = fixture.registry.get(id, STRANGER).await;
    assert!(matches!(forbidden, Err(Error::Forbidden(_))));
    assert_eq!(forbidden.unwrap_err().status_code(), 403);

    let missing = fixture.registry.get(ServerId(42), OWNER).await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
    assert_eq!(missing.unwrap_err().status_code(), 404);
    Ok(())
}

#[tokio::test]
async fn test_update_command_rewrites_launch_script() -> Result<()> {
    let fixture = Fixture::new();
    let id = fixture.registry.create(fixture.request("modded", "java -jar server.jar")).await?;

    fixture
        .registry
        .update_command(id, OWNER, "java -Xmx8G -jar server.jar nogui")
        .await?;

    let script = fixture.server_root("modded").join("env/start.sh");
    assert_eq!(
        fs::read_to_string(script).unwrap(),
        "#!/bin/bash\njava -Xmx8G -jar server.jar nogui\n"
    );
    assert_eq!(
        fixture.registry.get(id, OWNER).await?.config.command,
        "java -Xmx8G -jar server.jar nogui"
    );

    let blank = fixture.registry.update_command(id, OWNER, "").await;
    assert!(matches!(blank, Err(Error::InvalidCommand(_))));

    let forbidden = fixture.registry.update_command(id, STRANGER, "rm -rf /").await;
    assert!(matches!(forbidden, Err(Error::Forbidden(_))));
    assert_eq!(
        fixture.store.config_for(id).await?.unwrap().command,
        "java -Xmx8G -jar server.jar nogui"
    );
    Ok(())
}

#[tokio::test]
async fn test_provision_repairs_environment() -> Result<()> {
    let fixture = Fixture::new();
    let id = fixture.registry.create(fixture.request("repair", "cat")).await?;
    let env = fixture.server_root("repair").join("env");

    fs::remove_file(env.join("server.jar")).unwrap();
    fs::remove_file(env.join("start.sh")).unwrap();

    let provisioned = fixture.registry.provision(id, OWNER).await?;

    assert_eq!(provisioned, env);
    assert_eq!(fs::read_link(env.join("server.jar")).unwrap(), fixture.jar_path());
    assert_eq!(fs::read_to_string(env.join("start.sh")).unwrap(), "#!/bin/bash\ncat\n");

    // Running it again changes nothing
    fixture.registry.provision(id, OWNER).await?;
    assert_eq!(fs::read_link(env.join("server.jar")).unwrap(), fixture.jar_path());
    Ok(())
}

#[tokio::test]
async fn test_delete_stopped_server() -> Result<()> {
    let fixture = Fixture::new();
    let id = fixture.registry.create(fixture.request("temporary", "cat")).await?;

    let forbidden = fixture.registry.delete(id, STRANGER).await;
    assert!(matches!(forbidden, Err(Error::Forbidden(_))));

    fixture.registry.delete(id, OWNER).await?;

    assert!(!fixture.registry.is_loaded(id));
    assert!(fixture.store.find_by_id(id).await?.is_none());
    assert!(matches!(fixture.registry.get(id, OWNER).await, Err(Error::NotFound(_))));
    Ok(())
}
