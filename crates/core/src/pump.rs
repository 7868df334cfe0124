//! RTSP stream pump: paces frames and fans them out to playing sessions.
//!
//! One pump thread serves every RTSP client. For each frame it plans the
//! interleaved RTP packets once, then visits the session slots in index
//! order and writes the packets to each playing socket. A failed write
//! closes that slot only; the frame is released after the last slot has
//! been visited.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::media::{MediaStream, Packet};
use crate::queue::FanoutQueue;
use crate::session::SessionTable;
use crate::stats::StreamStats;

/// Limits output to one frame per interval.
///
/// Time is passed in as a [`Duration`] since an arbitrary origin, so the
/// pacer can be driven by a synthetic clock.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    next_due: Option<Duration>,
}

impl FramePacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// How long until a frame may be emitted. Zero if one may go now.
    pub fn until_due(&self, now: Duration) -> Duration {
        self.next_due
            .map_or(Duration::ZERO, |due| due.saturating_sub(now))
    }

    /// Claim the current slot. Returns `false` if the previous frame went
    /// out less than one interval ago.
    pub fn try_admit(&mut self, now: Duration) -> bool {
        if let Some(due) = self.next_due
            && now < due
        {
            return false;
        }
        self.next_due = Some(now + self.interval);
        true
    }
}

pub struct StreamPump {
    sessions: SessionTable,
    stream: Arc<MediaStream>,
    stats: Arc<StreamStats>,
}

impl StreamPump {
    pub fn new(sessions: SessionTable, stream: Arc<MediaStream>, stats: Arc<StreamStats>) -> Self {
        Self {
            sessions,
            stream,
            stats,
        }
    }

    /// Send `frame` to every playing session and release it.
    ///
    /// Returns how many sessions received the whole frame.
    pub fn deliver(&self, frame: Frame) -> usize {
        if self.sessions.playing_count() == 0 {
            self.stream.track_format(&frame);
            frame.release();
            return 0;
        }

        let packets = self.stream.packetize(&frame);
        let data = frame.data();
        let wire_bytes: usize = packets.iter().map(Packet::wire_len).sum();

        let mut reached = 0u64;
        for slot in self.sessions.slots() {
            let sent = slot.send_media(|socket| {
                for packet in &packets {
                    socket.write_all(packet.prefix())?;
                    socket.write_all(packet.payload(data))?;
                }
                Ok(())
            });
            match sent {
                None => {}
                Some(Ok(())) => reached += 1,
                Some(Err(e)) => {
                    self.stats.record_send_failure();
                    tracing::warn!(
                        slot = slot.index(),
                        peer = ?slot.peer_addr(),
                        frame_id = frame.id(),
                        error = %e,
                        "media send failed, closing session"
                    );
                }
            }
        }

        if reached > 0 {
            self.stats.rtsp.record_frame(
                packets.len() as u64 * reached,
                wire_bytes as u64 * reached,
            );
        }
        tracing::trace!(frame_id = frame.id(), reached, packets = packets.len(), "frame pumped");
        frame.release();
        reached as usize
    }

    /// Pump loop. Pops frames from the RTSP queue, waits out the pacing
    /// interval, then delivers. Exits when `running` is cleared.
    pub fn run(
        self,
        queue: FanoutQueue<Frame>,
        interval: Duration,
        poll_timeout: Duration,
        running: Arc<AtomicBool>,
    ) {
        let origin = Instant::now();
        let mut pacer = FramePacer::new(interval);

        while running.load(Ordering::SeqCst) {
            let Some(frame) = queue.try_pop(poll_timeout) else {
                continue;
            };

            let wait = pacer.until_due(origin.elapsed());
            if !wait.is_zero() {
                thread::sleep(wait);
            }
            if !running.load(Ordering::SeqCst) {
                frame.release();
                break;
            }

            pacer.try_admit(origin.elapsed());
            self.deliver(frame);
        }
        tracing::debug!("stream pump exited");
    }
}
