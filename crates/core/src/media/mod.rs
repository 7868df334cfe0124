//! RTP packetization of raw camera frames.
//!
//! Frames are not re-encoded: each frame's pixel bytes become the payload
//! of one RTP packet (RFC 3550) with dynamic payload type 96 on a 90 kHz
//! clock, wrapped in the 4-byte interleave prefix of RFC 2326 §10.12 so it
//! can travel on the client's RTSP TCP connection.
//!
//! [`MediaStream`] is the single stream the server publishes. It is shared
//! by the pump (which packetizes) and the RTSP handlers (which describe
//! the stream in SDP and report `RTP-Info` on PLAY).

pub mod interleaved;
pub mod packetizer;
pub mod rtp;

use parking_lot::{Mutex, RwLock};

use crate::frame::{Frame, PixelFormat};
pub use packetizer::{Packet, RawFramePacketizer};

/// Geometry and rate of the published stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub fps: u32,
}

pub struct MediaStream {
    packetizer: Mutex<RawFramePacketizer>,
    format: RwLock<StreamFormat>,
    timestamp_increment: u32,
}

impl MediaStream {
    pub fn new(packetizer: RawFramePacketizer, format: StreamFormat) -> Self {
        Self {
            packetizer: Mutex::new(packetizer),
            timestamp_increment: rtp::VIDEO_CLOCK_RATE / format.fps.max(1),
            format: RwLock::new(format),
        }
    }

    pub fn format(&self) -> StreamFormat {
        *self.format.read()
    }

    pub fn payload_type(&self) -> u8 {
        self.packetizer.lock().payload_type()
    }

    pub fn next_sequence(&self) -> u16 {
        self.packetizer.lock().next_sequence()
    }

    pub fn next_rtp_timestamp(&self) -> u32 {
        self.packetizer.lock().next_rtp_timestamp()
    }

    /// Plan the packets for `frame` and track its geometry for later
    /// DESCRIBE responses.
    pub fn packetize(&self, frame: &Frame) -> Vec<Packet> {
        self.track_format(frame);
        self.packetizer
            .lock()
            .packetize(frame.len(), self.timestamp_increment)
    }

    /// Follow the geometry of `frame` without sending it.
    pub fn track_format(&self, frame: &Frame) {
        let mut format = self.format.write();
        if format.width != frame.width()
            || format.height != frame.height()
            || format.pixel_format != frame.pixel_format()
        {
            tracing::info!(
                width = frame.width(),
                height = frame.height(),
                pixel_format = %frame.pixel_format(),
                "stream format changed"
            );
            format.width = frame.width();
            format.height = frame.height();
            format.pixel_format = frame.pixel_format();
        }
    }

    /// SDP media-level attributes for the current format.
    pub fn sdp_attributes(&self) -> Vec<String> {
        let format = self.format();
        let pt = self.payload_type();
        let mut attrs = vec![format!(
            "a=rtpmap:{pt} {}/{}",
            format.pixel_format.sdp_encoding(),
            rtp::VIDEO_CLOCK_RATE
        )];
        if format.pixel_format != PixelFormat::Jpeg {
            attrs.push(format!(
                "a=fmtp:{pt} sampling={}; width={}; height={}; depth=8",
                format.pixel_format.sampling(),
                format.width,
                format.height
            ));
        }
        attrs.push(format!("a=framesize:{pt} {}-{}", format.width, format.height));
        attrs.push(format!("a=framerate:{}", format.fps));
        attrs.push("a=control:streamid=0".to_string());
        attrs
    }
}
