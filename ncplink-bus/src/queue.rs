//! Bounded byte queue shared between a producer and a consumer task.
//!
//! The receive path must never wait, so it pushes with
//! [`ByteQueue::try_push`] and gets a full queue reported back immediately.
//! Task-side producers use [`ByteQueue::push_timeout`]. The consumer blocks
//! in [`ByteQueue::pop`].

use crate::error::BusError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct QueueState {
    buf: VecDeque<u8>,
    closed: bool,
}

/// FIFO of raw bytes with a fixed capacity.
pub struct ByteQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    readable: Notify,
    writable: Notify,
}

impl ByteQueue {
    /// Allocates a queue able to hold `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Result<Self, BusError> {
        if capacity == 0 {
            return Err(BusError::InvalidConfig(
                "queue capacity must be non-zero".to_string(),
            ));
        }
        let mut buf = VecDeque::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| BusError::OutOfMemory {
                requested: capacity,
            })?;
        Ok(Self {
            state: Mutex::new(QueueState { buf, closed: false }),
            capacity,
            readable: Notify::new(),
            writable: Notify::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn free(&self) -> usize {
        self.capacity - self.len()
    }

    /// Appends all of `data` or nothing, without waiting.
    pub fn try_push(&self, data: &[u8]) -> Result<(), BusError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(BusError::Closed);
            }
            let free = self.capacity - state.buf.len();
            if data.len() > free {
                return Err(BusError::QueueFull {
                    len: data.len(),
                    free,
                });
            }
            state.buf.extend(data);
        }
        self.readable.notify_waiters();
        Ok(())
    }

    /// Appends all of `data`, waiting up to `timeout` for space.
    ///
    /// Fails with [`BusError::Backpressure`] when the space does not appear
    /// in time. A payload larger than the whole queue fails at once.
    pub async fn push_timeout(&self, data: &[u8], timeout: Duration) -> Result<(), BusError> {
        if data.len() > self.capacity {
            return Err(BusError::Backpressure {
                len: data.len(),
                free: self.free(),
                timeout: Duration::ZERO,
            });
        }

        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.writable.notified();
            match self.try_push(data) {
                Ok(()) => return Ok(()),
                Err(BusError::QueueFull { .. }) => {}
                Err(e) => return Err(e),
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(BusError::Backpressure {
                    len: data.len(),
                    free: self.free(),
                    timeout,
                });
            }
        }
    }

    /// Removes and returns every queued byte, waiting until at least one is
    /// available. Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            let notified = self.readable.notified();
            if let Some(result) = self.take() {
                return result;
            }
            notified.await;
        }
    }

    /// Removes and returns every queued byte without waiting.
    pub fn try_pop(&self) -> Option<Bytes> {
        self.take().flatten()
    }

    // Outer None: nothing to report yet. Inner None: closed and empty.
    fn take(&self) -> Option<Option<Bytes>> {
        let chunk = {
            let mut state = self.state.lock();
            if state.buf.is_empty() {
                return if state.closed { Some(None) } else { None };
            }
            let bytes: Vec<u8> = state.buf.drain(..).collect();
            bytes
        };
        self.writable.notify_waiters();
        Some(Some(Bytes::from(chunk)))
    }

    /// Wakes all waiters; later pushes fail and pops drain what is left.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Re-opens a closed queue, discarding stale contents. An open queue is
    /// left as is.
    pub fn reopen(&self) {
        let mut state = self.state.lock();
        if state.closed {
            state.buf.clear();
            state.closed = false;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl std::fmt::Debug for ByteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ByteQueue")
            .field("len", &state.buf.len())
            .field("capacity", &self.capacity)
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_try_push_all_or_nothing() {
        let queue = ByteQueue::with_capacity(4).unwrap();
        queue.try_push(&[1, 2, 3]).unwrap();

        let result = queue.try_push(&[4, 5]);
        assert!(matches!(result, Err(BusError::QueueFull { len: 2, free: 1 })));
        assert_eq!(queue.len(), 3);

        queue.try_push(&[4]).unwrap();
        assert_eq!(queue.free(), 0);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            ByteQueue::with_capacity(0),
            Err(BusError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_impossible_capacity_is_out_of_memory() {
        assert!(matches!(
            ByteQueue::with_capacity(usize::MAX),
            Err(BusError::OutOfMemory { .. })
        ));
    }

    #[tokio::test]
    async fn test_pop_returns_fifo_chunk() {
        let queue = ByteQueue::with_capacity(16).unwrap();
        queue.try_push(&[1, 2]).unwrap();
        queue.try_push(&[3]).unwrap();

        let chunk = queue.pop().await.unwrap();
        assert_eq!(&chunk[..], &[1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_pop_waits_for_producer() {
        let queue = Arc::new(ByteQueue::with_capacity(16).unwrap());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::task::yield_now().await;
        queue.try_push(&[9]).unwrap();

        let chunk = consumer.await.unwrap().unwrap();
        assert_eq!(&chunk[..], &[9]);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = ByteQueue::with_capacity(8).unwrap();
        queue.try_push(&[1]).unwrap();
        queue.close();

        assert_eq!(&queue.pop().await.unwrap()[..], &[1]);
        assert!(queue.pop().await.is_none());
        assert!(matches!(queue.try_push(&[2]), Err(BusError::Closed)));

        queue.reopen();
        queue.try_push(&[2]).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_push_timeout_backpressure() {
        let queue = ByteQueue::with_capacity(4).unwrap();
        queue.try_push(&[0; 3]).unwrap();

        let result = queue
            .push_timeout(&[1, 2], Duration::from_millis(20))
            .await;
        assert!(matches!(
            result,
            Err(BusError::Backpressure { len: 2, free: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_push_timeout_oversized_fails_fast() {
        let queue = ByteQueue::with_capacity(4).unwrap();
        let result = queue
            .push_timeout(&[0; 5], Duration::from_secs(3600))
            .await;
        assert!(matches!(result, Err(BusError::Backpressure { len: 5, .. })));
    }

    #[tokio::test]
    async fn test_push_timeout_succeeds_after_drain() {
        let queue = Arc::new(ByteQueue::with_capacity(4).unwrap());
        queue.try_push(&[0; 4]).unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push_timeout(&[7, 7], Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        assert_eq!(queue.try_pop().unwrap().len(), 4);

        producer.await.unwrap().unwrap();
        assert_eq!(&queue.try_pop().unwrap()[..], &[7, 7]);
    }
}
