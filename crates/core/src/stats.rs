//! Rolling frame-rate and throughput counters.
//!
//! Counters are plain atomics so the pump, the FPV sender and readers can
//! touch them concurrently. Each path keeps a window frame counter that
//! [`StreamStats::tick`] turns into an fps figure and resets; packet and
//! byte totals are cumulative until [`StreamStats::take_totals`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::queue::ConsumerClass;

/// Counters for one delivery path.
#[derive(Debug, Default)]
pub struct PathCounters {
    frames: AtomicU64,
    packets: AtomicU64,
    bytes: AtomicU64,
    window_frames: AtomicU64,
    fps_bits: AtomicU64,
}

impl PathCounters {
    /// Record one frame delivered as `packets` packets totalling `bytes`.
    pub fn record_frame(&self, packets: u64, bytes: u64) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.window_frames.fetch_add(1, Ordering::Relaxed);
        self.packets.fetch_add(packets, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Close the current window and return its frame rate.
    fn tick(&self, elapsed: Duration) -> f64 {
        let frames = self.window_frames.swap(0, Ordering::Relaxed);
        let secs = elapsed.as_secs_f64();
        let fps = if secs > 0.0 { frames as f64 / secs } else { 0.0 };
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
        fps
    }

    fn snapshot(&self) -> PathSnapshot {
        PathSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            fps: f64::from_bits(self.fps_bits.load(Ordering::Relaxed)),
        }
    }

    fn take(&self) -> PathSnapshot {
        PathSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            packets: self.packets.swap(0, Ordering::Relaxed),
            bytes: self.bytes.swap(0, Ordering::Relaxed),
            fps: f64::from_bits(self.fps_bits.load(Ordering::Relaxed)),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.frames,
            &self.packets,
            &self.bytes,
            &self.window_frames,
            &self.fps_bits,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of one path's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PathSnapshot {
    pub frames: u64,
    pub packets: u64,
    pub bytes: u64,
    /// Frame rate over the last completed window.
    pub fps: f64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub capture: PathSnapshot,
    pub display: PathSnapshot,
    pub rtsp: PathSnapshot,
    pub fpv: PathSnapshot,
    pub capture_misses: u64,
    pub dropped_display: u64,
    pub dropped_rtsp: u64,
    pub dropped_udp: u64,
    pub send_failures: u64,
    pub oversized_frames: u64,
}

/// Process-wide statistics, shared by every task of a server.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub capture: PathCounters,
    pub display: PathCounters,
    pub rtsp: PathCounters,
    pub fpv: PathCounters,
    capture_misses: AtomicU64,
    dropped: [AtomicU64; 3],
    send_failures: AtomicU64,
    oversized_frames: AtomicU64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_capture_miss(&self) {
        self.capture_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self, class: ConsumerClass) {
        self.dropped[Self::class_index(class)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_oversized(&self) {
        self.oversized_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Close the fps window on every path.
    pub fn tick(&self, elapsed: Duration) -> StatsSnapshot {
        for path in [&self.capture, &self.display, &self.rtsp, &self.fpv] {
            path.tick(elapsed);
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.assemble(PathCounters::snapshot)
    }

    /// Snapshot, then zero the cumulative packet and byte totals.
    pub fn take_totals(&self) -> StatsSnapshot {
        self.assemble(PathCounters::take)
    }

    /// Zero everything (server start).
    pub fn reset(&self) {
        for path in [&self.capture, &self.display, &self.rtsp, &self.fpv] {
            path.reset();
        }
        for counter in self.dropped.iter().chain([
            &self.capture_misses,
            &self.send_failures,
            &self.oversized_frames,
        ]) {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn assemble(&self, read: impl Fn(&PathCounters) -> PathSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            capture: read(&self.capture),
            display: read(&self.display),
            rtsp: read(&self.rtsp),
            fpv: read(&self.fpv),
            capture_misses: self.capture_misses.load(Ordering::Relaxed),
            dropped_display: self.dropped[0].load(Ordering::Relaxed),
            dropped_rtsp: self.dropped[1].load(Ordering::Relaxed),
            dropped_udp: self.dropped[2].load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            oversized_frames: self.oversized_frames.load(Ordering::Relaxed),
        }
    }

    fn class_index(class: ConsumerClass) -> usize {
        match class {
            ConsumerClass::Display => 0,
            ConsumerClass::Rtsp => 1,
            ConsumerClass::Udp => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn tick_computes_fps_and_resets_window() {
        let stats = StreamStats::new();
        for _ in 0..10 {
            stats.rtsp.record_frame(1, 19_216);
        }

        let snap = stats.tick(Duration::from_secs(1));
        assert_eq!(snap.rtsp.fps, 10.0);
        assert_eq!(snap.rtsp.frames, 10);

        // Empty window: fps drops to zero, totals persist.
        let snap = stats.tick(Duration::from_secs(1));
        assert_eq!(snap.rtsp.fps, 0.0);
        assert_eq!(snap.rtsp.bytes, 192_160);
    }

    #[test]
    fn fps_uses_actual_elapsed_time() {
        let stats = StreamStats::new();
        for _ in 0..5 {
            stats.fpv.record_frame(19, 19_352);
        }
        let snap = stats.tick(Duration::from_millis(500));
        assert_eq!(snap.fpv.fps, 10.0);
    }

    #[test]
    fn take_totals_resets_packets_and_bytes() {
        let stats = StreamStats::new();
        stats.fpv.record_frame(19, 1000);
        let taken = stats.take_totals();
        assert_eq!(taken.fpv.packets, 19);
        assert_eq!(taken.fpv.bytes, 1000);

        let after = stats.snapshot();
        assert_eq!(after.fpv.packets, 0);
        assert_eq!(after.fpv.bytes, 0);
        assert_eq!(after.fpv.frames, 1);
    }

    #[test]
    fn drops_are_counted_per_class() {
        let stats = StreamStats::new();
        stats.record_drop(ConsumerClass::Rtsp);
        stats.record_drop(ConsumerClass::Rtsp);
        stats.record_drop(ConsumerClass::Udp);
        let snap = stats.snapshot();
        assert_eq!(snap.dropped_display, 0);
        assert_eq!(snap.dropped_rtsp, 2);
        assert_eq!(snap.dropped_udp, 1);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let stats = Arc::new(StreamStats::new());
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.rtsp.record_frame(1, 10);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.rtsp.frames, 4000);
        assert_eq!(snap.rtsp.bytes, 40_000);
    }
}
