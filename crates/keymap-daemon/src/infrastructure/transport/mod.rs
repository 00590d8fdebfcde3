//! Byte transports for the command stream.
//!
//! [`ChannelTransport`] adapts the non-blocking [`Transport`] contract to
//! Tokio: the receive side (a TCP reader, a USB endpoint callback) pushes
//! chunks into a bounded channel through a [`TransportHandle`], and the
//! session worker drains them.  An empty chunk is a notification with no
//! data; a service cycle woken by one finds nothing to read and resyncs.
//!
//! Writes that find the outbound channel full are spooled in order and
//! delivered by [`ChannelTransport::flush_spool`] once the peer catches up.
//! The spool is capped at [`MAX_SPOOLED_CHUNKS`].
//!
//! [`run_stream_worker`] is the single task that owns the session.  It waits
//! for inbound activity, runs one service cycle, then awaits delivery of
//! anything spooled.  It never holds the editor lock across an `.await`.
//!
//! # Testability
//!
//! [`mock::ScriptedTransport`] replays scripted reads synchronously and
//! records every write.

use std::collections::VecDeque;

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, info, trace, warn};

use crate::application::command_stream::{CommandSession, LinkError, StreamError, Transport};

pub mod mock;

/// Default capacity, in chunks, of both transport channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Outbound chunks held while the channel is full; one more is `Backpressure`.
pub const MAX_SPOOLED_CHUNKS: usize = 4096;

/// Session side of a channel-backed transport.
#[derive(Debug)]
pub struct ChannelTransport {
    inbound: mpsc::Receiver<Vec<u8>>,
    outbound: mpsc::Sender<Vec<u8>>,
    staged: VecDeque<u8>,
    spool: VecDeque<Vec<u8>>,
    initialized: bool,
}

/// Peer side of a [`ChannelTransport`].
///
/// The fields are separate so a bridge can wait on `outbound` while feeding
/// `inbound` from the same `select!` loop.
#[derive(Debug)]
pub struct TransportHandle {
    /// Chunks received from the host.  Send an empty chunk to wake the
    /// worker without data.
    pub inbound: mpsc::Sender<Vec<u8>>,
    /// Chunks the session wrote, one per `Transport::write` call.
    pub outbound: mpsc::Receiver<Vec<u8>>,
}

/// Creates a connected transport pair with `capacity` chunks per direction.
pub fn channel_transport(capacity: usize) -> (ChannelTransport, TransportHandle) {
    let (in_tx, in_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    (
        ChannelTransport {
            inbound: in_rx,
            outbound: out_tx,
            staged: VecDeque::new(),
            spool: VecDeque::new(),
            initialized: false,
        },
        TransportHandle {
            inbound: in_tx,
            outbound: out_rx,
        },
    )
}

impl ChannelTransport {
    /// Waits for the next inbound chunk and stages it for reading.
    ///
    /// # Errors
    ///
    /// [`LinkError::Closed`] once every [`TransportHandle`] sender is gone
    /// and no chunks remain.
    pub async fn readable(&mut self) -> Result<(), LinkError> {
        match self.inbound.recv().await {
            Some(chunk) => {
                trace!(len = chunk.len(), "inbound chunk");
                self.staged.extend(chunk);
                Ok(())
            }
            None => Err(LinkError::Closed),
        }
    }

    /// Bytes staged but not yet read.
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Outbound chunks waiting for channel space.
    pub fn spooled(&self) -> usize {
        self.spool.len()
    }

    /// Sends every spooled chunk, waiting for channel space as needed.
    ///
    /// # Errors
    ///
    /// [`LinkError::Closed`] if the peer dropped its receiver.
    pub async fn flush_spool(&mut self) -> Result<(), LinkError> {
        if !self.spool.is_empty() {
            debug!(chunks = self.spool.len(), "delivering spooled writes");
        }
        while let Some(chunk) = self.spool.pop_front() {
            self.outbound
                .send(chunk)
                .await
                .map_err(|_| LinkError::Closed)?;
        }
        Ok(())
    }

    fn pull_pending(&mut self) {
        while self.staged.is_empty() {
            match self.inbound.try_recv() {
                Ok(chunk) if chunk.is_empty() => continue,
                Ok(chunk) => self.staged.extend(chunk),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
    }
}

impl Transport for ChannelTransport {
    fn init(&mut self) -> Result<(), LinkError> {
        if self.outbound.is_closed() {
            return Err(LinkError::Closed);
        }
        self.initialized = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        if !self.initialized {
            return Err(LinkError::Stalled);
        }
        self.pull_pending();
        let n = buf.len().min(self.staged.len());
        for (dst, src) in buf.iter_mut().zip(self.staged.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, LinkError> {
        if self.outbound.is_closed() {
            return Err(LinkError::Closed);
        }
        // Queue behind earlier spooled chunks to keep write order.
        let chunk = if self.spool.is_empty() {
            match self.outbound.try_send(buf.to_vec()) {
                Ok(()) => return Ok(buf.len()),
                Err(TrySendError::Full(chunk)) => chunk,
                Err(TrySendError::Closed(_)) => return Err(LinkError::Closed),
            }
        } else {
            buf.to_vec()
        };
        if self.spool.len() >= MAX_SPOOLED_CHUNKS {
            return Err(LinkError::Backpressure);
        }
        self.spool.push_back(chunk);
        Ok(buf.len())
    }
}

/// Runs the command session until the transport closes.
///
/// # Errors
///
/// Fatal session errors: a failed `init`, transport failures other than a
/// clean close, short writes, and a host that outruns the outbound spool.
pub async fn run_stream_worker(
    mut session: CommandSession<ChannelTransport>,
) -> Result<(), StreamError> {
    session.init()?;
    debug!("stream worker started");

    loop {
        match session.transport_mut().readable().await {
            Ok(()) => {}
            Err(LinkError::Closed) => {
                info!("command stream closed");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let report = session.service()?;
        if report.rejected > 0 {
            warn!(rejected = report.rejected, "stream commands rejected");
        }

        match session.transport_mut().flush_spool().await {
            Ok(()) => {}
            Err(LinkError::Closed) => {
                info!("command stream closed");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use keymap_core::protocol::frame::{CommandFrame, CommandHeader, CommandKind, PayloadFrame};
    use keymap_core::{BehaviorId, BehaviorRegistry, GridDimensions, KeyBinding};

    use super::*;
    use crate::application::editor::SharedEditor;
    use crate::application::keymap_store::KeymapStore;
    use crate::infrastructure::storage::{BlobBackend, MemoryStore};

    fn editor() -> SharedEditor {
        let store = KeymapStore::new(
            Arc::new(BehaviorRegistry::builtin()),
            GridDimensions::new(1, 2).unwrap(),
            vec![
                KeyBinding::new(BehaviorId(5), 0x04, 0),
                KeyBinding::new(BehaviorId(27), 0, 0),
            ],
            Box::new(BlobBackend::new(MemoryStore::new())),
        )
        .unwrap();
        SharedEditor::new(store)
    }

    fn read_keymap() -> Vec<u8> {
        CommandFrame::new(CommandKind::ReadKeymap, Vec::new())
            .encode()
            .unwrap()
    }

    #[test]
    fn test_read_before_init_is_stalled() {
        let (mut transport, _handle) = channel_transport(4);
        let mut buf = [0u8; 8];
        assert!(matches!(transport.read(&mut buf), Err(LinkError::Stalled)));
    }

    #[tokio::test]
    async fn test_read_drains_staged_and_pending_chunks() {
        // Arrange
        let (mut transport, handle) = channel_transport(4);
        transport.init().unwrap();
        handle.inbound.send(vec![1, 2, 3]).await.unwrap();
        handle.inbound.send(Vec::new()).await.unwrap();
        handle.inbound.send(vec![4]).await.unwrap();

        // Act
        transport.readable().await.unwrap();
        let mut buf = [0u8; 2];
        let first = transport.read(&mut buf).unwrap();
        let second = transport.read(&mut buf[..]).unwrap();
        let third = transport.read(&mut buf[1..]).unwrap();
        let fourth = transport.read(&mut buf).unwrap();

        // Assert
        assert_eq!((first, second, third, fourth), (2, 1, 1, 0));
        assert_eq!(buf, [3, 4]);
    }

    #[tokio::test]
    async fn test_full_outbound_spools_writes_in_order() {
        // Arrange
        let (mut transport, mut handle) = channel_transport(1);
        transport.init().unwrap();

        // Act
        assert_eq!(transport.write(&[1, 2]).unwrap(), 2);
        assert_eq!(transport.write(&[3]).unwrap(), 1);
        assert_eq!(transport.write(&[4]).unwrap(), 1);
        let spooled = transport.spooled();
        let flush = tokio::spawn(async move {
            transport.flush_spool().await.map(|()| transport.spooled())
        });
        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(handle.outbound.recv().await.unwrap());
        }

        // Assert
        assert_eq!(spooled, 2);
        assert_eq!(received, vec![vec![1, 2], vec![3], vec![4]]);
        assert_eq!(flush.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_reports_backpressure_when_spool_is_full() {
        let (mut transport, _handle) = channel_transport(1);
        transport.init().unwrap();
        transport.write(&[0]).unwrap();
        for _ in 0..MAX_SPOOLED_CHUNKS {
            transport.write(&[1]).unwrap();
        }

        assert!(matches!(transport.write(&[2]), Err(LinkError::Backpressure)));
        assert_eq!(transport.spooled(), MAX_SPOOLED_CHUNKS);
    }

    #[tokio::test]
    async fn test_write_after_peer_dropped_is_closed() {
        let (mut transport, handle) = channel_transport(1);
        drop(handle);
        assert!(matches!(transport.init(), Err(LinkError::Closed)));
        assert!(matches!(transport.write(&[1]), Err(LinkError::Closed)));
    }

    #[tokio::test]
    async fn test_worker_answers_read_keymap_and_exits_on_close() {
        // Arrange
        let (transport, mut handle) = channel_transport(DEFAULT_CHANNEL_CAPACITY);
        let worker = tokio::spawn(run_stream_worker(CommandSession::new(transport, editor())));

        // Act
        handle.inbound.send(read_keymap()).await.unwrap();
        let header = handle.outbound.recv().await.unwrap();
        let payload = handle.outbound.recv().await.unwrap();
        drop(handle.inbound);
        let result = worker.await.unwrap();

        // Assert
        let header = CommandHeader::decode(&header).unwrap();
        assert_eq!(header.command, CommandKind::ReadKeymap.tag());
        assert_eq!(header.length as usize, payload.len());
        let (payload_frame, _) = PayloadFrame::decode(&payload).unwrap();
        assert_eq!(&payload_frame.data[..2], &[1, 2]);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_pipelined_read_keymaps_are_all_answered() {
        // Arrange: more responses than the outbound channel holds
        const COMMANDS: usize = 40;
        let (transport, mut handle) = channel_transport(DEFAULT_CHANNEL_CAPACITY);
        let worker = tokio::spawn(run_stream_worker(CommandSession::new(transport, editor())));
        let burst: Vec<u8> = (0..COMMANDS).flat_map(|_| read_keymap()).collect();

        // Act
        handle.inbound.send(burst).await.unwrap();
        let mut responses = Vec::new();
        for _ in 0..COMMANDS * 2 {
            responses.push(handle.outbound.recv().await.unwrap());
        }
        drop(handle.inbound);
        let result = worker.await.unwrap();

        // Assert: header, payload, header, payload, ...
        for pair in responses.chunks(2) {
            let header = CommandHeader::decode(&pair[0]).unwrap();
            assert_eq!(header.command, CommandKind::ReadKeymap.tag());
            assert_eq!(header.length as usize, pair[1].len());
        }
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_empty_chunk_wakes_session_into_resync() {
        // Arrange
        let (transport, mut handle) = channel_transport(DEFAULT_CHANNEL_CAPACITY);
        let mut session = CommandSession::new(transport, editor());
        session.init().unwrap();
        let frame = read_keymap();

        // Act: half a header, an idle wake-up, then a complete command.
        handle.inbound.send(frame[..2].to_vec()).await.unwrap();
        session.transport_mut().readable().await.unwrap();
        let partial = session.service().unwrap();

        handle.inbound.send(Vec::new()).await.unwrap();
        session.transport_mut().readable().await.unwrap();
        let idle = session.service().unwrap();

        handle.inbound.send(frame).await.unwrap();
        session.transport_mut().readable().await.unwrap();
        let complete = session.service().unwrap();

        // Assert
        assert_eq!(partial.bytes_read, 2);
        assert!(!partial.resynced);
        assert!(idle.resynced);
        assert_eq!(session.buffered(), 0);
        assert_eq!(complete.commands, 1);
        let header = CommandHeader::decode(&handle.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(header.length as usize, 4 + 2 + 2 * 12);
    }
}
