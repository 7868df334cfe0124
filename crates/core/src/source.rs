//! Synthetic camera: moving colour bars in a small set of recycled buffers.
//!
//! Stands in for the sensor driver on hosts without one. Like a camera
//! frame-buffer driver it owns a fixed number of buffers; when every
//! buffer is out, [`acquire_frame`](FrameProducer::acquire_frame) reports a
//! capture miss until one comes back.

use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, StreamError};
use crate::frame::{CapturedFrame, FrameProducer, PixelFormat};

/// Eight SMPTE-ish bars as (r, g, b).
const BARS: [(u8, u8, u8); 8] = [
    (255, 255, 255),
    (255, 255, 0),
    (0, 255, 255),
    (0, 255, 0),
    (255, 0, 255),
    (255, 0, 0),
    (0, 0, 255),
    (0, 0, 0),
];

struct Timing {
    interval: Duration,
    next_due: Option<Instant>,
}

pub struct TestPatternSource {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    free: Mutex<Vec<Vec<u8>>>,
    tick: Mutex<u32>,
    timing: Mutex<Option<Timing>>,
}

impl TestPatternSource {
    /// `buffers` frame buffers of `width`×`height` in `pixel_format`.
    ///
    /// JPEG has no fixed buffer size and is refused.
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat, buffers: usize) -> Result<Self> {
        let len = pixel_format.frame_len(width, height).ok_or_else(|| {
            StreamError::InvalidConfig(format!("test pattern cannot produce {pixel_format}"))
        })?;
        if len == 0 || buffers == 0 {
            return Err(StreamError::InvalidConfig(
                "test pattern needs a non-empty frame and at least one buffer".into(),
            ));
        }
        Ok(Self {
            width,
            height,
            pixel_format,
            free: Mutex::new((0..buffers).map(|_| vec![0u8; len]).collect()),
            tick: Mutex::new(0),
            timing: Mutex::new(None),
        })
    }

    /// Block in `acquire_frame` so frames come out at most `fps` per second,
    /// the way a sensor delivers them.
    pub fn with_frame_rate(self, fps: u32) -> Self {
        *self.timing.lock() = Some(Timing {
            interval: Duration::from_secs(1) / fps.max(1),
            next_due: None,
        });
        self
    }

    /// Buffers currently free.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    fn wait_for_next_frame(&self) {
        let mut timing = self.timing.lock();
        let Some(timing) = timing.as_mut() else {
            return;
        };
        let now = Instant::now();
        if let Some(due) = timing.next_due
            && due > now
        {
            thread::sleep(due - now);
        }
        timing.next_due = Some(Instant::now() + timing.interval);
    }

    fn paint(&self, buffer: &mut [u8], tick: u32) {
        let width = self.width as usize;
        let bpp = self.pixel_format.bytes_per_pixel().unwrap_or(1);
        let shift = tick as usize * 4;

        for (i, pixel) in buffer.chunks_exact_mut(bpp).enumerate() {
            let x = i % width;
            let (r, g, b) = BARS[((x + shift) % width) * BARS.len() / width];
            match self.pixel_format {
                PixelFormat::Rgb565 => {
                    let value =
                        (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3);
                    pixel.copy_from_slice(&value.to_le_bytes());
                }
                PixelFormat::Rgb888 => pixel.copy_from_slice(&[r, g, b]),
                PixelFormat::Grayscale => pixel[0] = luma(r, g, b),
                PixelFormat::Yuv422 => pixel.copy_from_slice(&[luma(r, g, b), 128]),
                PixelFormat::Jpeg => {}
            }
        }
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((u32::from(r) * 77 + u32::from(g) * 150 + u32::from(b) * 29) >> 8) as u8
}

impl FrameProducer for TestPatternSource {
    fn acquire_frame(&self) -> Option<CapturedFrame> {
        let mut data = self.free.lock().pop()?;
        self.wait_for_next_frame();

        let tick = {
            let mut tick = self.tick.lock();
            *tick = tick.wrapping_add(1);
            *tick
        };
        self.paint(&mut data, tick);

        Some(CapturedFrame {
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
            data,
        })
    }

    fn release_frame(&self, frame: CapturedFrame) {
        self.free.lock().push(frame.data);
    }
}
