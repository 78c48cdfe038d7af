//! Byte queue between the pty reader thread and the decoder.
//!
//! The reader appends under the lock; the consumer takes the whole queued
//! range in one move and decodes it without holding the lock.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Result of one reader burst
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillOutcome {
    /// A redraw should be requested now
    pub force_update: bool,
    /// The reader hit end of file or a read error
    pub eof: bool,
}

#[derive(Debug, Default)]
pub struct ByteQueue {
    bytes: Mutex<Vec<u8>>,
    draining: AtomicBool,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // A panic while holding the lock leaves plain bytes behind; keep going
        self.bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read from `reader` in `chunk`-sized pieces until it would block, ends,
    /// or `max_block` bytes are queued.
    pub fn fill_from<R: Read>(
        &self,
        reader: &mut R,
        chunk: usize,
        max_block: usize,
    ) -> io::Result<FillOutcome> {
        let mut queue = self.lock();
        let was_empty = queue.is_empty();
        let mut outcome = FillOutcome::default();
        let mut buf = vec![0u8; chunk.max(1)];

        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    outcome.eof = true;
                    break;
                }
                Ok(n) => {
                    queue.extend_from_slice(&buf[..n]);
                    if queue.len() >= max_block {
                        outcome.force_update = true;
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // EIO from the master once the child side has closed
                Err(e) if e.raw_os_error() == Some(libc::EIO) => {
                    outcome.eof = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if was_empty && !queue.is_empty() {
            outcome.force_update = true;
        }
        Ok(outcome)
    }

    /// Append bytes directly
    pub fn push(&self, bytes: &[u8]) {
        self.lock().extend_from_slice(bytes);
    }

    /// Move everything queued out, flagging the queue as draining until the
    /// matching [`ByteQueue::finish_drain`].
    pub fn drain(&self) -> Vec<u8> {
        self.draining.store(true, Ordering::SeqCst);
        std::mem::take(&mut *self.lock())
    }

    pub fn finish_drain(&self) {
        self.draining.store(false, Ordering::SeqCst);
    }

    /// Whether the consumer is still processing the previous burst
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serves fixed chunks, then reports `WouldBlock`
    struct ChunkReader {
        chunks: Vec<Vec<u8>>,
        eof: bool,
    }

    impl Read for ChunkReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                return if self.eof {
                    Ok(0)
                } else {
                    Err(io::ErrorKind::WouldBlock.into())
                };
            }
            let chunk = self.chunks.remove(0);
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.insert(0, chunk[n..].to_vec());
            }
            Ok(n)
        }
    }

    #[test]
    fn test_fill_until_would_block() {
        let queue = ByteQueue::new();
        let mut reader = ChunkReader {
            chunks: vec![b"hello ".to_vec(), b"world".to_vec()],
            eof: false,
        };
        let outcome = queue.fill_from(&mut reader, 4, 1024).unwrap();
        assert!(outcome.force_update);
        assert!(!outcome.eof);
        assert_eq!(queue.drain(), b"hello world");
        assert!(queue.is_draining());
        queue.finish_drain();
        assert!(!queue.is_draining());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_second_burst_does_not_force() {
        let queue = ByteQueue::new();
        queue.push(b"pending");
        let mut reader = ChunkReader {
            chunks: vec![b"more".to_vec()],
            eof: false,
        };
        let outcome = queue.fill_from(&mut reader, 16, 1024).unwrap();
        assert!(!outcome.force_update);
        assert_eq!(queue.len(), 11);
    }

    #[test]
    fn test_block_cap_forces_update() {
        let queue = ByteQueue::new();
        queue.push(b"x");
        let mut reader = ChunkReader {
            chunks: vec![vec![b'a'; 64]; 4],
            eof: false,
        };
        let outcome = queue.fill_from(&mut reader, 64, 100).unwrap();
        assert!(outcome.force_update);
        assert_eq!(queue.len(), 129);
    }

    #[test]
    fn test_eof() {
        let queue = ByteQueue::new();
        let mut reader = ChunkReader {
            chunks: vec![b"bye".to_vec()],
            eof: true,
        };
        let outcome = queue.fill_from(&mut reader, 16, 1024).unwrap();
        assert!(outcome.eof);
        assert_eq!(queue.drain(), b"bye");
    }
}
