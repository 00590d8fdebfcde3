//! Scripted transport for driving a command session without Tokio.
//!
//! Allows tests to queue inbound chunks and inspect every write the session
//! makes, one synchronous `service()` call at a time.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::application::command_stream::{LinkError, Transport};

#[derive(Debug, Default)]
struct Script {
    reads: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    init_calls: usize,
}

/// A [`Transport`] that replays queued chunks.
///
/// Each read returns at most one queued chunk.  An empty chunk makes that
/// read return 0, which is how a test marks the end of a burst.  Clones share
/// the same script, so a test keeps one handle after moving another into a
/// session.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `bytes` for the next read.
    pub fn feed(&self, bytes: &[u8]) {
        self.script().reads.push_back(bytes.to_vec());
    }

    /// Queues every byte of `bytes` as its own chunk.
    pub fn feed_bytewise(&self, bytes: &[u8]) {
        let mut script = self.script();
        script.reads.extend(bytes.iter().map(|b| vec![*b]));
    }

    /// Queues a read that returns no data.
    pub fn feed_idle(&self) {
        self.script().reads.push_back(Vec::new());
    }

    /// Chunks queued but not yet read.
    pub fn pending_reads(&self) -> usize {
        self.script().reads.len()
    }

    /// Every write so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.script().writes.clone()
    }

    /// Removes and returns the writes recorded so far.
    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.script().writes)
    }

    pub fn init_calls(&self) -> usize {
        self.script().init_calls
    }
}

impl Transport for ScriptedTransport {
    fn init(&mut self) -> Result<(), LinkError> {
        self.script().init_calls += 1;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let mut script = self.script();
        let Some(mut chunk) = script.reads.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            script.reads.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, LinkError> {
        self.script().writes.push(buf.to_vec());
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_reads_follow_queue_order() {
        // Arrange
        let mut transport = ScriptedTransport::new();
        transport.feed(&[1, 2, 3]);
        transport.feed_idle();
        transport.feed_bytewise(&[9, 8]);
        let mut buf = [0u8; 2];

        // Act
        let reads: Vec<usize> = (0..6).map(|_| transport.read(&mut buf).unwrap()).collect();

        // Assert
        assert_eq!(reads, vec![2, 1, 0, 1, 1, 0]);
        assert_eq!(buf[0], 8);
    }

    #[test]
    fn test_writes_are_visible_through_clones() {
        let observer = ScriptedTransport::new();
        let mut transport = observer.clone();

        transport.init().unwrap();
        transport.write(&[0xAA]).unwrap();
        transport.write(&[0xBB, 0xCC]).unwrap();

        assert_eq!(observer.init_calls(), 1);
        assert_eq!(observer.take_writes(), vec![vec![0xAA], vec![0xBB, 0xCC]]);
        assert!(observer.writes().is_empty());
    }
}
