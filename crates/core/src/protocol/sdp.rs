//! SDP (Session Description Protocol) generation (RFC 4566).
//!
//! ```text
//! v=0
//! o=- <sess-id> <sess-ver> IN IP4 <addr>
//! s=<session-name>
//! c=IN IP4 <addr>
//! t=0 0
//! a=tool:camstream
//! a=sendonly
//! m=video 0 RTP/AVP 96
//! a=rtpmap:96 raw/90000
//! a=fmtp:96 sampling=RGB565; width=320; height=240; depth=8
//! a=framesize:96 320-240
//! a=framerate:10
//! a=control:streamid=0
//! ```
//!
//! Media attributes come from [`MediaStream`], so they follow the pixel
//! format and resolution of the frames actually being sent.

use std::net::Ipv6Addr;

use crate::media::MediaStream;

/// `ip` is written as `IP6` when it parses as an IPv6 address, `IP4`
/// otherwise (IPv4 literals and host names).
pub fn generate_sdp(stream: &MediaStream, ip: &str, session_name: &str) -> String {
    let addr_type = if ip.parse::<Ipv6Addr>().is_ok() {
        "IP6"
    } else {
        "IP4"
    };
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!("o=- 0 0 IN {} {}", addr_type, ip));
    sdp.push(format!("s={}", session_name));
    sdp.push(format!("c=IN {} {}", addr_type, ip));
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:camstream".to_string());
    sdp.push("a=sendonly".to_string());
    sdp.push(format!("m=video 0 RTP/AVP {}", stream.payload_type()));
    sdp.extend(stream.sdp_attributes());

    format!("{}\r\n", sdp.join("\r\n"))
}
