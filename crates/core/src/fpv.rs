//! FPV consumer: drains the UDP queue into an [`FpvSender`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{Result, StreamError};
use crate::frame::Frame;
use crate::queue::FanoutQueue;
use crate::stats::StreamStats;
use crate::transport::udp::{FpvSender, SentFrame};

pub struct FpvStreamer {
    sender: FpvSender,
    stats: Arc<StreamStats>,
    next_frame_id: u16,
}

impl FpvStreamer {
    pub fn new(sender: FpvSender, stats: Arc<StreamStats>) -> Self {
        Self {
            sender,
            stats,
            next_frame_id: 0,
        }
    }

    /// Send one frame and release it.
    ///
    /// Every frame consumes a frame id, sent or not, so the receiver can
    /// tell a rejected frame from a lost one.
    pub fn send(&mut self, frame: Frame) -> Result<SentFrame> {
        let frame_id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);

        let result = self.sender.send_frame(frame.data(), frame_id);
        match &result {
            Ok(sent) => self
                .stats
                .fpv
                .record_frame(u64::from(sent.packets), sent.bytes as u64),
            Err(StreamError::FrameTooLarge { len, max }) => {
                self.stats.record_oversized();
                tracing::debug!(frame_id, len, max, "FPV frame too large, skipped");
            }
            Err(e) => {
                self.stats.record_send_failure();
                tracing::debug!(frame_id, error = %e, "FPV send failed");
            }
        }
        frame.release();
        result
    }

    pub fn run(
        mut self,
        queue: FanoutQueue<Frame>,
        poll_timeout: Duration,
        running: Arc<AtomicBool>,
    ) {
        tracing::info!(dest = %self.sender.dest(), "FPV streamer started");
        while running.load(Ordering::SeqCst) {
            if let Some(frame) = queue.try_pop(poll_timeout) {
                let _ = self.send(frame);
            }
        }
        tracing::debug!("FPV streamer exited");
    }
}
