//! Local display consumer.
//!
//! The panel driver lives outside the engine; it plugs in through
//! [`DisplaySink`] and is fed from its own queue so a slow panel never
//! holds up the network paths.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::frame::Frame;
use crate::queue::FanoutQueue;
use crate::stats::StreamStats;

/// Something that can show a frame, such as an LCD panel.
pub trait DisplaySink: Send {
    /// Draw `frame`. The frame is released after this returns.
    fn draw(&mut self, frame: &Frame) -> Result<()>;
}

pub type SharedDisplay = Arc<Mutex<Box<dyn DisplaySink>>>;

/// Draw frames from `queue` until `running` is cleared.
pub fn run_display(
    sink: SharedDisplay,
    queue: FanoutQueue<Frame>,
    stats: Arc<StreamStats>,
    poll_timeout: Duration,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        let Some(frame) = queue.try_pop(poll_timeout) else {
            continue;
        };
        match sink.lock().draw(&frame) {
            Ok(()) => stats.display.record_frame(1, frame.len() as u64),
            Err(e) => tracing::warn!(frame_id = frame.id(), error = %e, "display draw failed"),
        }
        frame.release();
    }
    tracing::debug!("display consumer exited");
}
