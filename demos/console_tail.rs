//! Runs one server under the registry and bridges its console to this terminal.
//!
//! Lines typed on stdin are sent to the server as commands, console output is
//! printed as it arrives, Ctrl-C stops the server.
//!
//! ```text
//! RUST_LOG=gameserver_runner=debug cargo run --example console_tail -- cat
//! ```

use futures::StreamExt;
use gameserver_runner::registry::{CreateServer, ServerRegistry};
use gameserver_runner::resources::{JarRef, ResourceCatalog};
use gameserver_runner::server::OwnerId;
use gameserver_runner::store::JsonStore;
use gameserver_runner::{Config, config::validate_config};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    let command = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let command = if command.is_empty() { "cat".to_string() } else { command };

    let config = match std::env::var("RUNNER_CONFIG") {
        Ok(path) => Config::from_file(path)?,
        Err(_) => Config::default(),
    };
    validate_config(&config)?;

    let root = std::env::temp_dir().join(format!("console-tail-{}", std::process::id()));
    std::fs::create_dir_all(&root)?;
    let jar = root.join("server.jar");
    std::fs::write(&jar, b"")?;

    let resources = Arc::new(ResourceCatalog::new());
    resources.register_jar(JarRef(1), &jar)?;
    let store = Arc::new(JsonStore::open(root.join("servers.json")).await?);
    let registry = ServerRegistry::new(config, store, resources);

    let owner = OwnerId(1);
    let id = registry
        .create(CreateServer {
            name: "console-tail".to_string(),
            path: root.join("server"),
            command,
            jar: JarRef(1),
            mod_pack: None,
            owner,
        })
        .await?;

    let console = registry.subscribe(id).await?;
    registry.start(id, owner).await?;
    tracing::info!(server_id = %id, "Server running, type commands, Ctrl-C to stop");

    let printer = tokio::spawn(async move {
        let mut lines = Box::pin(console.into_stream());
        while let Some(line) = lines.next().await {
            println!("{}", line);
        }
    });

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = input.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = registry.send_command(id, owner, &line).await {
                        tracing::warn!(error = %e, "Command not delivered");
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    registry.shutdown().await;
    let _ = printer.await;
    std::fs::remove_dir_all(&root)?;
    Ok(())
}
