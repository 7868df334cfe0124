//! Camera frame fan-out and streaming engine.
//!
//! A single frame producer feeds three independent consumers through
//! bounded drop-new queues: a local display, RTSP clients (RTP interleaved
//! on the RTSP TCP connection) and a best-effort UDP "FPV" receiver.
//!
//! ```no_run
//! use std::sync::Arc;
//! use camstream::{PixelFormat, StreamConfig, StreamServer, TestPatternSource};
//!
//! let config = StreamConfig::default();
//! let source = TestPatternSource::new(320, 240, PixelFormat::Rgb565, 3)?
//!     .with_frame_rate(config.target_fps);
//! let mut server = StreamServer::new(config)?;
//! server.start(Arc::new(source))?;
//! println!("{}", server.stream_url().unwrap_or_default());
//! # Ok::<(), camstream::StreamError>(())
//! ```

pub mod config;
pub mod display;
pub mod error;
pub mod fpv;
pub mod frame;
pub mod media;
pub mod protocol;
pub mod pump;
pub mod queue;
pub mod server;
pub mod session;
pub mod source;
pub mod stats;
pub mod transport;

pub use config::StreamConfig;
pub use display::DisplaySink;
pub use error::{ParseErrorKind, Result, StreamError};
pub use frame::{CapturedFrame, Frame, FramePool, FrameProducer, PixelFormat};
pub use queue::{ConsumerClass, FanOut, FanoutQueue};
pub use server::StreamServer;
pub use source::TestPatternSource;
pub use stats::{StatsSnapshot, StreamStats};
pub use transport::udp::{FPV_MAGIC, FRAGMENT_HEADER_LEN, FragmentHeader};
