//! TCP bridge for the framed command stream.
//!
//! Raw socket bytes are pushed into a
//! [`ChannelTransport`](crate::infrastructure::transport::ChannelTransport) and the session's
//! writes are copied back to the socket.  Only one connection is served at a
//! time: the command stream has exactly one worker, so a second host waits
//! in the listen backlog until the first disconnects.
//!
//! After [`IDLE_NOTIFY_AFTER`] without socket data, the bridge sends the
//! worker one empty chunk.  A partial command still buffered at that point
//! is discarded by the session's resynchronization.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::command_stream::CommandSession;
use crate::application::editor::SharedEditor;
use crate::infrastructure::transport::{
    channel_transport, run_stream_worker, TransportHandle, DEFAULT_CHANNEL_CAPACITY,
};

/// How long `accept` waits before re-checking the shutdown flag.
pub const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Socket silence after which the worker is woken with no data.
pub const IDLE_NOTIFY_AFTER: Duration = Duration::from_millis(250);

const SOCKET_READ_CHUNK: usize = 256;

// ── Public API ────────────────────────────────────────────────────────────────

/// Serves command-stream connections on `listener` until `running` is cleared.
///
/// # Errors
///
/// Returns an error only if the listener's local address cannot be read.
/// Per-connection failures are logged and the loop keeps accepting.
pub async fn run_stream_bridge(
    listener: TcpListener,
    editor: SharedEditor,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let local = listener
        .local_addr()
        .context("command stream listener has no local address")?;
    info!("command stream bridge listening on {local}");

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping command stream bridge");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                info!("command stream connection from {peer}");
                match serve_connection(stream, peer, editor.clone(), &running).await {
                    Ok(()) => info!("command stream {peer} closed"),
                    Err(e) => warn!("command stream {peer} closed with error: {e:#}"),
                }
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {
                // No connection within the poll window; re-check the flag.
            }
        }
    }

    Ok(())
}

// ── Per-connection handling ───────────────────────────────────────────────────

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    editor: SharedEditor,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let (transport, handle) = channel_transport(DEFAULT_CHANNEL_CAPACITY);
    let worker = tokio::spawn(run_stream_worker(CommandSession::new(transport, editor)));

    // Dropping the handle closes the worker's inbound channel.
    let pumped = pump(stream, handle, running).await;
    let worked = worker
        .await
        .with_context(|| format!("stream worker for {peer} panicked"))?;

    pumped?;
    worked.with_context(|| format!("stream worker for {peer} failed"))?;
    Ok(())
}

async fn pump(
    stream: TcpStream,
    mut handle: TransportHandle,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = [0u8; SOCKET_READ_CHUNK];
    let mut idle_sent = true;

    while running.load(Ordering::Relaxed) {
        tokio::select! {
            read = timeout(IDLE_NOTIFY_AFTER, reader.read(&mut buf)) => match read {
                Ok(Ok(0)) => {
                    debug!("host closed command stream");
                    break;
                }
                Ok(Ok(n)) => {
                    idle_sent = false;
                    if handle.inbound.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Ok(Err(e)) => return Err(e).context("command stream read failed"),
                Err(_) if !idle_sent => {
                    idle_sent = true;
                    if handle.inbound.send(Vec::new()).await.is_err() {
                        break;
                    }
                }
                Err(_) => {}
            },
            out = handle.outbound.recv() => match out {
                Some(bytes) => writer
                    .write_all(&bytes)
                    .await
                    .context("command stream write failed")?,
                None => break,
            },
        }
    }

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
