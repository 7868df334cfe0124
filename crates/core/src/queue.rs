//! Bounded, lossy queues between the producer and each consumer class.
//!
//! Every consumer class (display, RTSP, UDP) gets its own
//! [`FanoutQueue`] so a slow consumer fills only its own slots. Pushing
//! into a full queue drops the *incoming* item; for a [`Frame`] that
//! releases the buffer immediately.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

use crate::error::{Result, StreamError};
use crate::frame::Frame;

/// Fixed-capacity queue with drop-new overflow.
pub struct FanoutQueue<T = Frame> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for FanoutQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
            dropped: self.dropped.clone(),
        }
    }
}

impl<T> FanoutQueue<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero; a zero-capacity channel would be a
    /// rendezvous channel, not a buffer.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue without blocking.
    ///
    /// Fails with [`StreamError::QueueFull`] when the queue is full; the
    /// item is dropped on the spot.
    pub fn try_push(&self, item: T) -> Result<()> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(rejected)) | Err(TrySendError::Disconnected(rejected)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                drop(rejected);
                Err(StreamError::QueueFull)
            }
        }
    }

    /// Wait up to `timeout` for an item. `None` is a normal empty period.
    pub fn try_pop(&self, timeout: Duration) -> Option<T> {
        if timeout.is_zero() {
            return self.rx.try_recv().ok();
        }
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drop everything currently queued. Returns how many items were removed.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The consumers a frame is fanned out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerClass {
    Display,
    Rtsp,
    Udp,
}

impl ConsumerClass {
    pub const ALL: [ConsumerClass; 3] = [Self::Display, Self::Rtsp, Self::Udp];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Display => "display",
            Self::Rtsp => "rtsp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for ConsumerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of offering one frame to every consumer class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub accepted: Vec<ConsumerClass>,
    pub dropped: Vec<ConsumerClass>,
}

/// One queue per consumer class.
#[derive(Clone)]
pub struct FanOut {
    queues: Vec<(ConsumerClass, FanoutQueue<Frame>)>,
}

impl FanOut {
    pub fn new() -> Self {
        Self { queues: Vec::new() }
    }

    /// Register a queue for `class`, replacing any previous one.
    pub fn with_queue(mut self, class: ConsumerClass, capacity: usize) -> Self {
        self.queues.retain(|(c, _)| *c != class);
        self.queues.push((class, FanoutQueue::new(capacity)));
        self
    }

    pub fn queue(&self, class: ConsumerClass) -> Option<&FanoutQueue<Frame>> {
        self.queues
            .iter()
            .find(|(c, _)| *c == class)
            .map(|(_, q)| q)
    }

    /// Offer `frame` to every registered class without blocking.
    ///
    /// Each accepting queue holds its own handle; the caller's handle is
    /// consumed, so a frame nobody accepted is released before this returns.
    pub fn publish(&self, frame: Frame) -> PublishReport {
        let mut report = PublishReport::default();
        for (class, queue) in &self.queues {
            match queue.try_push(frame.clone()) {
                Ok(()) => report.accepted.push(*class),
                Err(e) => {
                    tracing::trace!(
                        frame_id = frame.id(),
                        class = %class,
                        error = %e,
                        "frame dropped"
                    );
                    report.dropped.push(*class);
                }
            }
        }
        frame.release();
        report
    }

    /// Empty every queue, releasing the queued frames.
    pub fn drain(&self) {
        for (_, queue) in &self.queues {
            queue.drain();
        }
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new()
    }
}
