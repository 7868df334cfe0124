//! Frame buffers and ownership tracking.
//!
//! A [`Frame`] is a shared handle over one buffer borrowed from the
//! [`FrameProducer`] (the camera driver). Handles are reference counted;
//! the buffer goes back to the producer through
//! [`FrameProducer::release_frame`] exactly once, when the last handle is
//! dropped or [`released`](Frame::release). Because release consumes the
//! handle, a released frame can no longer be read and cannot be released
//! twice.
//!
//! ```text
//! producer ──acquire──▶ FramePool ──Frame──▶ display queue ──▶ draw, drop
//!                                   ├──────▶ rtsp queue    ──▶ pump, drop
//!                                   └──────▶ udp queue     ──▶ fragment, drop
//!                                                   last drop ──▶ release_frame
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{Result, StreamError};

/// Pixel layout of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb565,
    Rgb888,
    Yuv422,
    Grayscale,
    Jpeg,
}

impl PixelFormat {
    /// Bytes per pixel for uncompressed formats, `None` for JPEG.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            Self::Rgb565 | Self::Yuv422 => Some(2),
            Self::Rgb888 => Some(3),
            Self::Grayscale => Some(1),
            Self::Jpeg => None,
        }
    }

    /// Encoding name for the SDP `a=rtpmap` line.
    pub fn sdp_encoding(self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            _ => "raw",
        }
    }

    /// Sampling name for the SDP `a=fmtp` line (RFC 4175 style).
    pub fn sampling(self) -> &'static str {
        match self {
            Self::Rgb565 => "RGB565",
            Self::Rgb888 => "RGB",
            Self::Yuv422 => "YCbCr-4:2:2",
            Self::Grayscale => "GRAYSCALE",
            Self::Jpeg => "JPEG",
        }
    }

    /// Expected buffer size for a frame of this format.
    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        self.bytes_per_pixel()
            .map(|bpp| width as usize * height as usize * bpp)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rgb565 => "rgb565",
            Self::Rgb888 => "rgb888",
            Self::Yuv422 => "yuv422",
            Self::Grayscale => "grayscale",
            Self::Jpeg => "jpeg",
        };
        f.write_str(name)
    }
}

impl FromStr for PixelFormat {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rgb565" => Ok(Self::Rgb565),
            "rgb888" | "rgb" => Ok(Self::Rgb888),
            "yuv422" => Ok(Self::Yuv422),
            "grayscale" | "gray" => Ok(Self::Grayscale),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            other => Err(StreamError::InvalidConfig(format!(
                "unknown pixel format '{other}'"
            ))),
        }
    }
}

/// A buffer handed out by the producer, with its metadata.
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
}

impl fmt::Debug for CapturedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixel_format", &self.pixel_format)
            .field("len", &self.data.len())
            .finish()
    }
}

/// The camera driver seam.
///
/// `acquire_frame` returns `None` on a transient capture miss; the caller
/// backs off and retries. Every buffer returned by `acquire_frame` comes
/// back through `release_frame` exactly once.
pub trait FrameProducer: Send + Sync {
    fn acquire_frame(&self) -> Option<CapturedFrame>;

    fn release_frame(&self, frame: CapturedFrame);
}

struct FrameInner {
    id: u64,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    buffer: Option<CapturedFrame>,
    producer: Arc<dyn FrameProducer>,
    outstanding: Arc<AtomicUsize>,
}

impl Drop for FrameInner {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.producer.release_frame(buffer);
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            tracing::trace!(frame_id = self.id, "frame released");
        }
    }
}

/// Shared, read-only handle over a captured frame.
///
/// Cloning hands another consumer a reference to the same buffer; no pixel
/// data is copied.
#[derive(Clone)]
pub struct Frame {
    inner: Arc<FrameInner>,
}

impl Frame {
    /// Monotonic id assigned by the pool, in capture order.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.inner.pixel_format
    }

    pub fn data(&self) -> &[u8] {
        match &self.inner.buffer {
            Some(buffer) => &buffer.data,
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Number of live handles, this one included.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Give up this handle. The buffer returns to the producer if this
    /// was the last one.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id())
            .field("width", &self.width())
            .field("height", &self.height())
            .field("pixel_format", &self.pixel_format())
            .field("len", &self.len())
            .finish()
    }
}

/// Wraps producer buffers in tracked [`Frame`] handles.
#[derive(Clone)]
pub struct FramePool {
    producer: Arc<dyn FrameProducer>,
    outstanding: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

impl FramePool {
    pub fn new(producer: Arc<dyn FrameProducer>) -> Self {
        Self {
            producer,
            outstanding: Arc::new(AtomicUsize::new(0)),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Take the next frame from the producer.
    ///
    /// Returns [`StreamError::CaptureUnavailable`] when the producer has
    /// nothing ready.
    pub fn acquire(&self) -> Result<Frame> {
        let captured = self
            .producer
            .acquire_frame()
            .ok_or(StreamError::CaptureUnavailable)?;
        Ok(self.wrap(captured))
    }

    /// Track a buffer obtained from this pool's producer by other means.
    pub fn wrap(&self, captured: CapturedFrame) -> Frame {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Frame {
            inner: Arc::new(FrameInner {
                id,
                width: captured.width,
                height: captured.height,
                pixel_format: captured.pixel_format,
                buffer: Some(captured),
                producer: self.producer.clone(),
                outstanding: self.outstanding.clone(),
            }),
        }
    }

    /// Frames acquired and not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}
