use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::StreamConfig;
use crate::display::{self, DisplaySink, SharedDisplay};
use crate::error::{Result, StreamError};
use crate::fpv::FpvStreamer;
use crate::frame::{FramePool, FrameProducer};
use crate::media::rtp::DYNAMIC_PAYLOAD_TYPE;
use crate::media::{MediaStream, RawFramePacketizer, StreamFormat};
use crate::pump::StreamPump;
use crate::queue::{ConsumerClass, FanOut};
use crate::session::SessionTable;
use crate::stats::{StatsSnapshot, StreamStats};
use crate::transport::tcp::{self, RtspContext};
use crate::transport::udp::FpvSender;

/// Camera streaming server.
///
/// Owns the session table, the published [`MediaStream`], the fan-out
/// queues and every worker thread. [`start`](Self::start) spawns:
///
/// - the capture loop (producer → fan-out),
/// - the RTSP accept loop (one handler thread per client),
/// - the RTSP stream pump,
/// - the FPV streamer, when a destination is configured,
/// - the display consumer, when a sink is attached,
/// - the stats monitor, when an interval is configured.
pub struct StreamServer {
    config: Arc<StreamConfig>,
    running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
    sessions: SessionTable,
    stream: Arc<MediaStream>,
    display: Option<SharedDisplay>,
    fanout: FanOut,
    pool: Option<FramePool>,
    local_addr: Option<SocketAddr>,
    threads: Vec<JoinHandle<()>>,
}

impl StreamServer {
    pub fn new(config: StreamConfig) -> Result<Self> {
        config.validate()?;

        let stream = MediaStream::new(
            RawFramePacketizer::with_random_ssrc(DYNAMIC_PAYLOAD_TYPE),
            StreamFormat {
                width: config.frame_width,
                height: config.frame_height,
                pixel_format: config.pixel_format,
                fps: config.target_fps,
            },
        );

        Ok(Self {
            sessions: SessionTable::new(config.max_clients),
            stream: Arc::new(stream),
            config: Arc::new(config),
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(StreamStats::new()),
            display: None,
            fanout: FanOut::new(),
            pool: None,
            local_addr: None,
            threads: Vec::new(),
        })
    }

    /// Attach a local display. Takes effect on the next [`start`](Self::start).
    pub fn with_display_sink(mut self, sink: impl DisplaySink + 'static) -> Self {
        let sink: Box<dyn DisplaySink> = Box::new(sink);
        self.display = Some(Arc::new(Mutex::new(sink)));
        self
    }

    /// Bind the sockets and spawn the worker threads.
    ///
    /// Socket setup failures are returned as [`StreamError::ResourceInit`]
    /// and leave the server stopped.
    pub fn start(&mut self, producer: Arc<dyn FrameProducer>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(StreamError::AlreadyRunning);
        }

        let listener =
            TcpListener::bind(self.config.rtsp_bind).map_err(StreamError::init("RTSP listener"))?;
        listener
            .set_nonblocking(true)
            .map_err(StreamError::init("RTSP listener"))?;
        let local_addr = listener
            .local_addr()
            .map_err(StreamError::init("RTSP listener"))?;

        let fpv = match self.config.fpv_dest {
            Some(dest) => Some(FpvSender::bind(
                dest,
                self.config.fpv_broadcast,
                self.config.max_udp_payload,
                self.config.max_fpv_frame_bytes,
                self.config.fpv_packet_delay,
            )?),
            None => None,
        };

        let mut fanout =
            FanOut::new().with_queue(ConsumerClass::Rtsp, self.config.rtsp_queue_capacity);
        if fpv.is_some() {
            fanout = fanout.with_queue(ConsumerClass::Udp, self.config.fpv_queue_capacity);
        }
        if self.display.is_some() {
            fanout = fanout.with_queue(ConsumerClass::Display, self.config.display_queue_capacity);
        }

        let pool = FramePool::new(producer);
        self.stats.reset();
        self.fanout = fanout.clone();
        self.pool = Some(pool.clone());
        self.local_addr = Some(local_addr);
        self.running.store(true, Ordering::SeqCst);

        if let Err(e) = self.spawn_workers(listener, pool, fanout, fpv) {
            self.stop();
            return Err(e);
        }

        let url = self.stream_url().unwrap_or_default();
        tracing::info!(
            addr = %local_addr,
            %url,
            max_clients = self.config.max_clients,
            fpv = ?self.config.fpv_dest,
            "stream server started"
        );
        Ok(())
    }

    fn spawn_workers(
        &mut self,
        listener: TcpListener,
        pool: FramePool,
        fanout: FanOut,
        fpv: Option<FpvSender>,
    ) -> Result<()> {
        let config = self.config.clone();
        let poll = config.queue_poll_timeout;

        let context = RtspContext {
            sessions: self.sessions.clone(),
            stream: self.stream.clone(),
            config: config.clone(),
        };
        let running = self.running.clone();
        self.spawn("rtsp-accept", move || tcp::accept_loop(listener, context, running))?;

        if let Some(queue) = fanout.queue(ConsumerClass::Rtsp).cloned() {
            let pump =
                StreamPump::new(self.sessions.clone(), self.stream.clone(), self.stats.clone());
            let interval = config.frame_interval();
            let running = self.running.clone();
            self.spawn("rtsp-pump", move || pump.run(queue, interval, poll, running))?;
        }

        if let (Some(sender), Some(queue)) = (fpv, fanout.queue(ConsumerClass::Udp).cloned()) {
            let streamer = FpvStreamer::new(sender, self.stats.clone());
            let running = self.running.clone();
            self.spawn("fpv-sender", move || streamer.run(queue, poll, running))?;
        }

        if let (Some(sink), Some(queue)) = (
            self.display.clone(),
            fanout.queue(ConsumerClass::Display).cloned(),
        ) {
            let (stats, running) = (self.stats.clone(), self.running.clone());
            self.spawn("display", move || display::run_display(sink, queue, stats, poll, running))?;
        }

        if let Some(interval) = config.stats_interval {
            let (stats, sessions, running) = (
                self.stats.clone(),
                self.sessions.clone(),
                self.running.clone(),
            );
            self.spawn("stats", move || stats_monitor(stats, sessions, interval, running))?;
        }

        let (stats, running) = (self.stats.clone(), self.running.clone());
        let backoff = config.capture_backoff;
        self.spawn("capture", move || capture_loop(pool, fanout, stats, backoff, running))?;

        Ok(())
    }

    fn spawn<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .map_err(StreamError::init("worker thread"))?;
        self.threads.push(handle);
        Ok(())
    }

    /// Stop every worker, close all client sockets and release queued frames.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) && self.threads.is_empty() {
            return;
        }
        tracing::info!("stream server stopping");

        self.sessions.close_all();
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::error!(thread = %name, "worker panicked");
            }
        }
        // handlers accepted just before the flag dropped
        self.sessions.close_all();
        self.fanout.drain();

        // Handlers notice the closed socket on their next read.
        let deadline = Instant::now() + self.config.socket_read_timeout * 2;
        while self.sessions.connected_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            captured = stats.capture.frames,
            rtsp_frames = stats.rtsp.frames,
            fpv_frames = stats.fpv.frames,
            outstanding = self.outstanding_frames(),
            "stream server stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Address the RTSP listener is bound to, once started.
    pub fn local_rtsp_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// `rtsp://host:port/path` as clients should open it.
    pub fn stream_url(&self) -> Option<String> {
        let addr = self.local_addr?;
        let host = match &self.config.public_host {
            Some(host) => host.clone(),
            None if addr.ip().is_unspecified() => "127.0.0.1".to_string(),
            None => addr.ip().to_string(),
        };
        Some(format!(
            "rtsp://{host}:{}/{}",
            addr.port(),
            self.config.rtsp_path.trim_start_matches('/')
        ))
    }

    /// Connected RTSP clients, in any state.
    pub fn client_count(&self) -> usize {
        self.sessions.connected_count()
    }

    pub fn playing_count(&self) -> usize {
        self.sessions.playing_count()
    }

    pub fn stream_format(&self) -> StreamFormat {
        self.stream.format()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stats_handle(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    /// Frames acquired from the producer and not yet released.
    pub fn outstanding_frames(&self) -> usize {
        self.pool.as_ref().map_or(0, FramePool::outstanding)
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pull frames from the producer and offer each to every consumer queue.
fn capture_loop(
    pool: FramePool,
    fanout: FanOut,
    stats: Arc<StreamStats>,
    backoff: Duration,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match pool.acquire() {
            Ok(frame) => {
                stats.capture.record_frame(1, frame.len() as u64);
                let report = fanout.publish(frame);
                for class in report.dropped {
                    stats.record_drop(class);
                }
            }
            Err(StreamError::CaptureUnavailable) => {
                stats.record_capture_miss();
                thread::sleep(backoff);
            }
            Err(e) => {
                tracing::warn!(error = %e, "capture failed");
                thread::sleep(backoff);
            }
        }
    }
    tracing::debug!("capture loop exited");
}

/// Log frame rates once per `interval`.
fn stats_monitor(
    stats: Arc<StreamStats>,
    sessions: SessionTable,
    interval: Duration,
    running: Arc<AtomicBool>,
) {
    let step = interval.min(Duration::from_millis(50));
    let mut window_start = Instant::now();

    while running.load(Ordering::SeqCst) {
        thread::sleep(step);
        let elapsed = window_start.elapsed();
        if elapsed < interval {
            continue;
        }
        window_start = Instant::now();

        let snap = stats.tick(elapsed);
        tracing::info!(
            capture_fps = snap.capture.fps,
            rtsp_fps = snap.rtsp.fps,
            fpv_fps = snap.fpv.fps,
            display_fps = snap.display.fps,
            clients = sessions.connected_count(),
            playing = sessions.playing_count(),
            rtsp_bytes = snap.rtsp.bytes,
            fpv_packets = snap.fpv.packets,
            dropped_rtsp = snap.dropped_rtsp,
            dropped_udp = snap.dropped_udp,
            capture_misses = snap.capture_misses,
            "stream stats"
        );
    }
}
