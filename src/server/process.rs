// src/server/process.rs
use crate::error::{Error, Result};
use crate::server::console;
use async_process::{Child, ChildStdin, Command, Stdio};
use futures_lite::io::AsyncWriteExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};

/// Persistent identity of a managed server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub u32);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the user owning a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub u32);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a managed server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    /// No process, or a stop has been requested
    Stopped,
    /// Server is running
    Running,
}

/// How a process generation ended, as observed by the exit monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Start generation the process belonged to
    pub generation: u64,
    /// Exit code, `None` when terminated by a signal or when waiting failed
    pub code: Option<i32>,
}

/// Confirmed state of the OS process, published by the exit monitor.
///
/// This is independent of the optimistic running flag: after `stop()` the
/// flag is cleared at once while this stays `Alive` until the process is
/// actually reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// No process was ever started by this handle
    Idle,
    /// A process of this generation is alive
    Alive {
        /// Start generation
        generation: u64,
    },
    /// The most recent process has exited
    Exited(ProcessExit),
}

/// Splits a launch command into executable and arguments on whitespace.
///
/// # Examples
///
/// ```
/// use gameserver_runner::server::split_command;
///
/// let (program, args) = split_command("java -Xmx2G -jar server.jar nogui").unwrap();
/// assert_eq!(program, "java");
/// assert_eq!(args, vec!["-Xmx2G", "-jar", "server.jar", "nogui"]);
/// ```
pub fn split_command(command: &str) -> Result<(String, Vec<String>)> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts
        .next()
        .ok_or_else(|| Error::InvalidCommand(format!("'{}' has no executable", command)))?;
    Ok((program, parts.collect()))
}

#[derive(Default)]
struct HandleState {
    running: bool,
    generation: u64,
    pid: Option<u32>,
    interrupted: bool,
    retired: bool,
    stdin: Option<Arc<AsyncMutex<ChildStdin>>>,
    console: Option<mpsc::Receiver<String>>,
    #[cfg(not(unix))]
    kill: Option<tokio::sync::oneshot::Sender<()>>,
}

/// Owns the spawn/monitor/interact lifecycle of one child process.
///
/// A handle is reusable across any number of start/stop cycles. Each start
/// opens a new generation with its own console channel; stdout and stderr
/// of that generation are merged into it line by line.
pub struct ProcessHandle {
    /// Server name, used for logging
    name: String,
    /// Capacity of each generation's console channel
    console_capacity: usize,
    /// Running flag, pipes and generation bookkeeping
    state: Arc<Mutex<HandleState>>,
    /// Confirmed process state
    liveness: Arc<watch::Sender<Liveness>>,
}

impl ProcessHandle {
    /// Create a stopped handle
    pub fn new(name: impl Into<String>, console_capacity: usize) -> Self {
        let (liveness, _) = watch::channel(Liveness::Idle);
        Self {
            name: name.into(),
            console_capacity: console_capacity.max(1),
            state: Arc::new(Mutex::new(HandleState::default())),
            liveness: Arc::new(liveness),
        }
    }

    /// Get the server name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, HandleState>> {
        self.state
            .lock()
            .map_err(|_| Error::Other(format!("Failed to lock process state of '{}'", self.name)))
    }

    /// Launch the process in `working_dir`.
    ///
    /// Returns the new start generation; its console is kept on the handle
    /// for [`take_console`](Self::take_console). On failure the handle stays
    /// stopped.
    pub async fn start(&self, working_dir: &Path, command: &str) -> Result<u64> {
        let mut state = self.lock_state()?;
        let (generation, console) = self.launch(&mut state, working_dir, command)?;
        state.console = Some(console);
        Ok(generation)
    }

    /// Launch the process and hand its console straight to the caller.
    ///
    /// The console never sits on the handle, so no concurrent caller can
    /// take it.
    pub async fn start_with_console(
        &self,
        working_dir: &Path,
        command: &str,
    ) -> Result<(u64, mpsc::Receiver<String>)> {
        let mut state = self.lock_state()?;
        self.launch(&mut state, working_dir, command)
    }

    fn launch(
        &self,
        state: &mut HandleState,
        working_dir: &Path,
        command: &str,
    ) -> Result<(u64, mpsc::Receiver<String>)> {
        if state.retired {
            return Err(Error::NotFound(format!("server '{}' has been deleted", self.name)));
        }
        if state.running || self.is_alive() {
            return Err(Error::AlreadyRunning);
        }
        let (program, args) = split_command(command)?;

        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::SpawnFailed(format!("{}: {}", program, e)))?;

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = child.kill();
                return Err(Error::SpawnFailed(format!(
                    "{}: failed to capture process pipes",
                    program
                )));
            }
        };

        state.generation += 1;
        let generation = state.generation;
        let pid = child.id();
        self.liveness.send_replace(Liveness::Alive { generation });

        let (console_tx, console_rx) = mpsc::channel(self.console_capacity);
        console::spawn_line_reader(
            self.name.clone(),
            "stdout",
            stdout,
            console_tx.clone(),
            self.liveness.subscribe(),
            generation,
        );
        console::spawn_line_reader(
            self.name.clone(),
            "stderr",
            stderr,
            console_tx,
            self.liveness.subscribe(),
            generation,
        );

        #[cfg(not(unix))]
        {
            let (kill_tx, kill_rx) = tokio::sync::oneshot::channel();
            state.kill = Some(kill_tx);
            self.spawn_exit_monitor(child, generation, kill_rx);
        }
        #[cfg(unix)]
        self.spawn_exit_monitor(child, generation);

        state.running = true;
        state.interrupted = false;
        state.pid = Some(pid);
        state.stdin = Some(Arc::new(AsyncMutex::new(stdin)));
        // An untaken console of an earlier generation is dropped
        state.console = None;

        tracing::info!(server = %self.name, pid, generation, program = %program, "Server process started");
        Ok((generation, console_rx))
    }

    /// Mark the handle as deleted; every later start fails with `NotFound`.
    ///
    /// The check and the mark happen under the handle lock, so no start can
    /// slip in between. Fails with `ServerRunning` while a process is
    /// running or still alive.
    pub fn retire(&self) -> Result<()> {
        let mut state = self.lock_state()?;
        if state.running || self.is_alive() {
            return Err(Error::ServerRunning(self.name.clone()));
        }
        state.retired = true;
        Ok(())
    }

    /// Undo [`retire`](Self::retire), e.g. when the deletion failed
    pub fn reinstate(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.retired = false;
        }
    }

    #[cfg(unix)]
    fn spawn_exit_monitor(&self, mut child: Child, generation: u64) {
        let name = self.name.clone();
        let state = Arc::clone(&self.state);
        let liveness = Arc::clone(&self.liveness);

        tokio::spawn(async move {
            let status = child.status().await;
            Self::record_exit(&name, &state, &liveness, generation, status);
        });
    }

    #[cfg(not(unix))]
    fn spawn_exit_monitor(
        &self,
        mut child: Child,
        generation: u64,
        mut kill: tokio::sync::oneshot::Receiver<()>,
    ) {
        let name = self.name.clone();
        let state = Arc::clone(&self.state);
        let liveness = Arc::clone(&self.liveness);

        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.status() => Some(status),
                Ok(()) = &mut kill => None,
            };
            let status = match exited {
                Some(status) => status,
                None => {
                    // No interrupt signal on this platform
                    let _ = child.kill();
                    child.status().await
                }
            };
            Self::record_exit(&name, &state, &liveness, generation, status);
        });
    }

    fn record_exit(
        name: &str,
        state: &Mutex<HandleState>,
        liveness: &watch::Sender<Liveness>,
        generation: u64,
        status: std::io::Result<std::process::ExitStatus>,
    ) {
        let code = match &status {
            Ok(status) if status.success() => {
                tracing::info!(server = %name, generation, "Server stopped gracefully");
                status.code()
            }
            Ok(status) => {
                tracing::info!(server = %name, generation, %status, "Server exited");
                status.code()
            }
            Err(e) => {
                tracing::warn!(server = %name, generation, error = %e, "Failed to wait for server process");
                None
            }
        };

        match state.lock() {
            Ok(mut state) if state.generation == generation => {
                state.running = false;
                state.pid = None;
                state.stdin = None;
                #[cfg(not(unix))]
                {
                    state.kill = None;
                }
            }
            Ok(_) => {}
            Err(_) => tracing::error!(server = %name, "Process state lock poisoned"),
        }

        liveness.send_replace(Liveness::Exited(ProcessExit { generation, code }));
    }

    /// Ask the process to stop.
    ///
    /// Sends an interrupt once per generation and clears the running flag at
    /// once; it does not wait for the process to exit; use
    /// [`wait_for_exit`](Self::wait_for_exit) for that. A process that ignores
    /// the interrupt keeps running until it exits on its own.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.lock_state()?;
        if !state.running {
            return Err(Error::NotRunning);
        }

        if !state.interrupted {
            state.interrupted = true;
            if let Err(e) = Self::interrupt(&mut state) {
                tracing::warn!(server = %self.name, error = %e, "Failed to send interrupt signal");
            } else {
                tracing::info!(server = %self.name, generation = state.generation, "Interrupt sent to server");
            }
        }

        state.running = false;
        Ok(())
    }

    #[cfg(unix)]
    fn interrupt(state: &mut HandleState) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let pid = state
            .pid
            .ok_or_else(|| Error::Other("process has no pid".to_string()))?;
        let pid = i32::try_from(pid).map_err(|_| Error::Other(format!("pid {} out of range", pid)))?;

        match signal::kill(Pid::from_raw(pid), Signal::SIGINT) {
            // Already gone; the exit monitor will catch up
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::Other(format!("kill({}, SIGINT): {}", pid, e))),
        }
    }

    #[cfg(not(unix))]
    fn interrupt(state: &mut HandleState) -> Result<()> {
        match state.kill.take() {
            Some(kill) => {
                let _ = kill.send(());
                Ok(())
            }
            None => Err(Error::Other("process already signalled".to_string())),
        }
    }

    /// Stop, wait up to `timeout` for the process to exit, then start again.
    ///
    /// A failed stop is returned without attempting the start.
    pub async fn restart(&self, working_dir: &Path, command: &str, timeout: Duration) -> Result<u64> {
        self.stop_and_wait(timeout).await?;
        self.start(working_dir, command).await
    }

    /// [`restart`](Self::restart), handing the new console straight to the caller
    pub async fn restart_with_console(
        &self,
        working_dir: &Path,
        command: &str,
        timeout: Duration,
    ) -> Result<(u64, mpsc::Receiver<String>)> {
        self.stop_and_wait(timeout).await?;
        self.start_with_console(working_dir, command).await
    }

    async fn stop_and_wait(&self, timeout: Duration) -> Result<()> {
        self.stop()?;

        tokio::time::timeout(timeout, self.wait_for_exit())
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "'{}' did not exit within {}s of the interrupt",
                    self.name,
                    timeout.as_secs()
                ))
            })?;
        Ok(())
    }

    /// Write `command` followed by a newline to the process's stdin.
    pub async fn send_command(&self, command: &str) -> Result<()> {
        let stdin = {
            let state = self.lock_state()?;
            if !state.running {
                return Err(Error::NotRunning);
            }
            state.stdin.clone().ok_or(Error::NotRunning)?
        };

        let mut line = String::with_capacity(command.len() + 1);
        line.push_str(command);
        line.push('\n');

        let mut stdin = stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::WriteFailed(format!("Failed to write to stdin: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::WriteFailed(format!("Failed to flush stdin: {}", e)))?;

        tracing::debug!(server = %self.name, command = %command, "Command sent to server");
        Ok(())
    }

    /// Optimistic running flag.
    pub fn is_running(&self) -> bool {
        self.state.lock().map(|state| state.running).unwrap_or(false)
    }

    /// Get the server status
    pub fn status(&self) -> ServerStatus {
        if self.is_running() {
            ServerStatus::Running
        } else {
            ServerStatus::Stopped
        }
    }

    /// Whether an OS process of this handle is still alive, regardless of
    /// any stop request.
    pub fn is_alive(&self) -> bool {
        matches!(*self.liveness.borrow(), Liveness::Alive { .. })
    }

    /// Confirmed process state
    pub fn liveness(&self) -> Liveness {
        *self.liveness.borrow()
    }

    /// Exit of the most recent generation, if it has exited
    pub fn last_exit(&self) -> Option<ProcessExit> {
        match *self.liveness.borrow() {
            Liveness::Exited(exit) => Some(exit),
            _ => None,
        }
    }

    /// Watch the confirmed process state
    pub fn subscribe_liveness(&self) -> watch::Receiver<Liveness> {
        self.liveness.subscribe()
    }

    /// Wait until the current process has exited.
    ///
    /// Returns `None` immediately if no process was ever started.
    pub async fn wait_for_exit(&self) -> Option<ProcessExit> {
        let mut liveness = self.liveness.subscribe();
        loop {
            let current = *liveness.borrow_and_update();
            match current {
                Liveness::Idle => return None,
                Liveness::Exited(exit) => return Some(exit),
                Liveness::Alive { .. } => {}
            }
            if liveness.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Current start generation, `0` before the first start
    pub fn generation(&self) -> u64 {
        self.state.lock().map(|state| state.generation).unwrap_or(0)
    }

    /// Generation whose console a new observer follows: the running one,
    /// or the next one while the handle is stopped or stopping.
    pub fn console_generation(&self) -> u64 {
        self.state
            .lock()
            .map(|state| {
                if state.running {
                    state.generation
                } else {
                    state.generation + 1
                }
            })
            .unwrap_or(0)
    }

    /// OS pid of the running process
    pub fn pid(&self) -> Option<u32> {
        self.state.lock().ok().and_then(|state| state.pid)
    }

    /// Take the console of the current generation.
    ///
    /// The receiver must be drained: once its buffer is full the line
    /// readers stop pulling output from the process.
    pub fn take_console(&self) -> Result<mpsc::Receiver<String>> {
        let mut state = self.lock_state()?;
        state.console.take().ok_or_else(|| {
            if state.generation == 0 {
                Error::NotRunning
            } else {
                Error::Other(format!(
                    "console of '{}' generation {} was already taken",
                    self.name, state.generation
                ))
            }
        })
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("liveness", &self.liveness())
            .finish()
    }
}
