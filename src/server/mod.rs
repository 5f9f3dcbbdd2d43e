/// Process management module for the game server runner.
///
/// This module owns the OS side of a managed server: spawning the process,
/// capturing its console output, delivering commands to its stdin and
/// observing its exit. All public components log through `tracing`.
///
/// # Components
///
/// * `process` - The [`ProcessHandle`] owning one child process per server
/// * `console` - Line readers merging stdout and stderr into the console channel
///
/// # Examples
///
/// Running a server process directly:
///
/// ```no_run
/// use gameserver_runner::server::ProcessHandle;
/// use std::path::Path;
///
/// # async fn run() -> gameserver_runner::Result<()> {
/// let handle = ProcessHandle::new("lobby", 100);
/// handle.start(Path::new("/srv/lobby/env"), "java -jar server.jar nogui").await?;
///
/// let mut console = handle.take_console()?;
/// handle.send_command("list").await?;
/// if let Some(line) = console.recv().await {
///     println!("{}", line);
/// }
///
/// handle.stop()?;
/// handle.wait_for_exit().await;
/// # Ok(())
/// # }
/// ```
mod console;
mod process;

pub use process::{
    Liveness, OwnerId, ProcessExit, ProcessHandle, ServerId, ServerStatus, split_command,
};
