//! Line readers feeding a process's console channel.
//!
//! Game servers are not guaranteed to print valid UTF-8, so output is read
//! as bytes up to each newline and decoded lossily instead of stopping the
//! reader at the first invalid sequence.

use crate::server::process::Liveness;
use futures_lite::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Spawn a task reading `stream` line by line into `console`.
///
/// Every line is logged. The reader stops at EOF or on a read error. If the
/// console is full when the process of `generation` exits, the reader gives
/// up instead of waiting for a consumer that may never come. If the console
/// receiver is dropped, the stream is still drained so the process never
/// blocks on a full pipe.
pub(crate) fn spawn_line_reader<R>(
    server: String,
    stream_type: &'static str,
    stream: R,
    console: mpsc::Sender<String>,
    mut liveness: watch::Receiver<Liveness>,
    generation: u64,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);
        let mut forwarding = true;

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }
                    }

                    let line = String::from_utf8_lossy(&buf).into_owned();
                    tracing::debug!(server = %server, stream = stream_type, "{}", line);

                    if !forwarding {
                        continue;
                    }

                    tokio::select! {
                        biased;
                        sent = console.send(line) => {
                            if sent.is_err() {
                                tracing::debug!(server = %server, stream = stream_type, "Console receiver dropped, draining only");
                                forwarding = false;
                            }
                        }
                        _ = exited(&mut liveness, generation) => {
                            tracing::debug!(server = %server, stream = stream_type, "Process exited with a full console, reader giving up");
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(server = %server, stream = stream_type, error = %e, "Console reader exiting due to read error");
                    break;
                }
            }
        }

        tracing::debug!(server = %server, stream = stream_type, generation, "Console reader task exiting");
    })
}

/// Resolves once the process of `generation` (or a later one) has exited.
async fn exited(liveness: &mut watch::Receiver<Liveness>, generation: u64) {
    loop {
        let current = *liveness.borrow_and_update();
        match current {
            Liveness::Exited(exit) if exit.generation >= generation => return,
            Liveness::Alive { generation: live } if live > generation => return,
            _ => {}
        }
        if liveness.changed().await.is_err() {
            return;
        }
    }
}
