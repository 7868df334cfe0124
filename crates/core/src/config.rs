use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, StreamError};
use crate::frame::PixelFormat;
use crate::transport::udp::{FRAGMENT_HEADER_LEN, validate_limits};

pub const DEFAULT_RTSP_PORT: u16 = 8554;
pub const DEFAULT_RTSP_PATH: &str = "stream";
pub const DEFAULT_MAX_CLIENTS: usize = 3;
pub const DEFAULT_TARGET_FPS: u32 = 10;
pub const DEFAULT_FPV_PORT: u16 = 8888;
pub const DEFAULT_MAX_UDP_PAYLOAD: usize = 1024;

/// Engine configuration.
///
/// Every field has a default matching the firmware constants, so
/// `StreamConfig::default()` is a working configuration on a device
/// with a QVGA RGB565 sensor.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Address the RTSP listener binds to. Port 0 picks an ephemeral port.
    pub rtsp_bind: SocketAddr,
    /// Path advertised in the stream URL. Not validated on SETUP/PLAY.
    pub rtsp_path: String,
    /// Maximum number of concurrent RTSP connections.
    pub max_clients: usize,
    /// Host advertised in the stream URL and SDP. Falls back to the
    /// request URI host, then the client-facing local address.
    pub public_host: Option<String>,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
    /// Reject requests without a `CSeq` header instead of echoing `CSeq: 0`.
    pub require_cseq: bool,

    /// Frame rate the RTSP pump paces to.
    pub target_fps: u32,
    /// Format advertised in DESCRIBE before the first frame arrives.
    pub frame_width: u32,
    pub frame_height: u32,
    pub pixel_format: PixelFormat,

    /// Destination of FPV datagrams. `None` disables the UDP path.
    pub fpv_dest: Option<SocketAddr>,
    /// Enable `SO_BROADCAST` on the FPV socket.
    pub fpv_broadcast: bool,
    /// Maximum datagram size, header included.
    pub max_udp_payload: usize,
    /// Frames larger than this are rejected by the UDP sender.
    pub max_fpv_frame_bytes: usize,
    /// Gap between consecutive fragments of one frame.
    pub fpv_packet_delay: Duration,

    /// Slots per consumer class queue.
    pub display_queue_capacity: usize,
    pub rtsp_queue_capacity: usize,
    pub fpv_queue_capacity: usize,

    /// How long a consumer blocks on an empty queue before re-polling.
    pub queue_poll_timeout: Duration,
    /// Read timeout on RTSP client sockets (bounds each `recv`).
    pub socket_read_timeout: Duration,
    /// Write timeout on RTSP client sockets (bounds each send).
    pub socket_write_timeout: Duration,
    /// Back-off after the producer reports no frame.
    pub capture_backoff: Duration,
    /// Interval of the fps/throughput log line. `None` disables the monitor.
    pub stats_interval: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            rtsp_bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_RTSP_PORT)),
            rtsp_path: DEFAULT_RTSP_PATH.to_string(),
            max_clients: DEFAULT_MAX_CLIENTS,
            public_host: None,
            sdp_session_name: "Camera Stream".to_string(),
            require_cseq: true,
            target_fps: DEFAULT_TARGET_FPS,
            frame_width: 320,
            frame_height: 240,
            pixel_format: PixelFormat::Rgb565,
            fpv_dest: Some(SocketAddr::from(([255, 255, 255, 255], DEFAULT_FPV_PORT))),
            fpv_broadcast: true,
            max_udp_payload: DEFAULT_MAX_UDP_PAYLOAD,
            max_fpv_frame_bytes: 320 * 240 * 2,
            fpv_packet_delay: Duration::from_millis(1),
            display_queue_capacity: 2,
            rtsp_queue_capacity: 2,
            fpv_queue_capacity: 2,
            queue_poll_timeout: Duration::from_millis(100),
            socket_read_timeout: Duration::from_millis(200),
            socket_write_timeout: Duration::from_secs(1),
            capture_backoff: Duration::from_millis(10),
            stats_interval: Some(Duration::from_secs(1)),
        }
    }
}

impl StreamConfig {
    /// Interval between frames emitted by the RTSP pump.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.target_fps.max(1)
    }

    /// RTP timestamp increment per frame on the 90 kHz video clock.
    pub fn rtp_timestamp_increment(&self) -> u32 {
        crate::media::rtp::VIDEO_CLOCK_RATE / self.target_fps.max(1)
    }

    /// Payload bytes carried by each FPV fragment.
    pub fn fpv_chunk_size(&self) -> usize {
        self.max_udp_payload.saturating_sub(FRAGMENT_HEADER_LEN)
    }

    /// Check for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_clients == 0 {
            return Err(StreamError::InvalidConfig("max_clients must be at least 1".into()));
        }
        if self.target_fps == 0 || self.target_fps > crate::media::rtp::VIDEO_CLOCK_RATE {
            return Err(StreamError::InvalidConfig(format!(
                "target_fps {} out of range",
                self.target_fps
            )));
        }
        validate_limits(self.max_udp_payload, self.max_fpv_frame_bytes)?;
        for (name, capacity) in [
            ("display_queue_capacity", self.display_queue_capacity),
            ("rtsp_queue_capacity", self.rtsp_queue_capacity),
            ("fpv_queue_capacity", self.fpv_queue_capacity),
        ] {
            if capacity == 0 {
                return Err(StreamError::InvalidConfig(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }
}
