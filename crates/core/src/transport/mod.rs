//! Network transport for the two delivery paths.
//!
//! - **TCP** ([`tcp`]): RTSP signaling, one thread per connection. RTP
//!   media rides the same connection, interleaved with `$` framing
//!   (RFC 2326 §10.12), written by the [`pump`](crate::pump).
//!
//! - **UDP** ([`udp`]): the FPV path. Frames are fragmented into
//!   datagrams with a small header and sent to one fixed destination.

pub mod tcp;
pub mod udp;

pub use tcp::RtspContext;
pub use udp::{FpvSender, FragmentHeader};
