/*!
 # Game Server Runner

 A Rust library for supervising externally executed game server processes
 and streaming their live console output to many observers.

 ## Overview

 Game Server Runner provides functionality to:
 - Create servers: persist them, provision their working directory and link
   shared jar/mod-pack resources into it
 - Start, stop and restart one OS process per server, never two at once
 - Send console commands to a running server's stdin
 - Subscribe any number of observers (e.g. web socket writers) to a
   server's console, without a slow observer stalling the others

 Authentication, HTTP routing and the relational store are left to the
 embedding application. The registry talks to them through the
 [`store::ServerStore`] and [`resources::ResourceResolver`] traits.

 ## Basic Usage

 ```no_run
 use gameserver_runner::config::Config;
 use gameserver_runner::registry::{CreateServer, ServerRegistry};
 use gameserver_runner::resources::{JarRef, ResourceCatalog};
 use gameserver_runner::server::OwnerId;
 use gameserver_runner::store::JsonStore;
 use gameserver_runner::Result;
 use std::sync::Arc;

 #[tokio::main]
 async fn main() -> Result<()> {
     let store = Arc::new(JsonStore::open("servers.json").await?);
     let resources = Arc::new(ResourceCatalog::new());
     resources.register_jar(JarRef(1), "/srv/common/jar_files/paper-1.21.jar")?;

     let registry = ServerRegistry::new(Config::default(), store, resources);
     let owner = OwnerId(7);

     let id = registry
         .create(CreateServer {
             name: "survival".to_string(),
             path: "/srv/game_servers/survival".into(),
             command: "java -Xmx4G -jar server.jar nogui".to_string(),
             jar: JarRef(1),
             mod_pack: None,
             owner,
         })
         .await?;

     let mut console = registry.subscribe(id).await?;
     registry.start(id, owner).await?;
     registry.send_command(id, owner, "list").await?;

     while let Some(line) = console.recv().await {
         println!("{}", line);
     }

     Ok(())
 }
 ```

 ## Features

 - **Process Supervision**: Start, stop, restart and command game servers
 - **Console Fan-out**: Drop-on-full delivery to any number of subscribers
 - **Lazy Loading**: Servers are rebuilt from persisted records on first use
 - **Provisioning**: Idempotent resource links and a launch script per server
 - **Configuration**: JSON or YAML settings with sensible defaults
 - **Error Handling**: Every error maps to a status/message pair

 ## License

 This project is licensed under the terms in the LICENSE file.
*/

pub mod broadcast;
pub mod config;
pub mod error;
pub mod provision;
pub mod registry;
pub mod resources;
pub mod server;
pub mod store;

pub use broadcast::{ConsoleBroadcaster, ConsoleSubscription, SubscriberId};
pub use config::Config;
pub use error::{Error, ErrorResponse, Result};
pub use registry::{CreateServer, ServerDetail, ServerRegistry, ServerSummary};
pub use server::{OwnerId, ProcessHandle, ServerId, ServerStatus};
