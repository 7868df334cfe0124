//! RTSP signaling (RFC 2326).
//!
//! Parses requests, builds responses, runs the per-connection method state
//! machine and describes the stream in SDP.
//!
//! ```text
//! DESCRIBE rtsp://192.168.4.1:8554/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! ## Supported methods
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery |
//! | DESCRIBE | §10.2 | Retrieve SDP session description |
//! | SETUP | §10.4 | Negotiate interleaved TCP transport |
//! | PLAY | §10.5 | Start media delivery |
//! | TEARDOWN | §10.7 | Destroy session |
//! | GET_PARAMETER | §10.8 | Keepalive |

pub mod handler;
pub mod request;
pub mod response;
pub mod sdp;

pub use handler::{Action, MethodHandler, Reply};
pub use request::RtspRequest;
pub use response::RtspResponse;
