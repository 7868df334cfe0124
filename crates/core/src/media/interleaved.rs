//! RTP-over-RTSP interleaving (RFC 2326 §10.12).
//!
//! Each binary packet on the RTSP TCP connection is prefixed with:
//!
//! ```text
//! +------+---------+------------------+
//! | '$'  | channel | length (u16, BE) |
//! +------+---------+------------------+
//! ```
//!
//! followed by `length` bytes (an RTP or RTCP packet). Channel 0 carries
//! RTP, channel 1 RTCP, as advertised by `interleaved=0-1` on SETUP.

pub const INTERLEAVED_MAGIC: u8 = b'$';
pub const INTERLEAVED_HEADER_LEN: usize = 4;
pub const RTP_CHANNEL: u8 = 0;
pub const RTCP_CHANNEL: u8 = 1;

pub fn encode_header(channel: u8, len: u16) -> [u8; INTERLEAVED_HEADER_LEN] {
    let [hi, lo] = len.to_be_bytes();
    [INTERLEAVED_MAGIC, channel, hi, lo]
}

/// Returns `(channel, length)` if `header` starts an interleaved frame.
pub fn decode_header(header: &[u8]) -> Option<(u8, u16)> {
    match header {
        [INTERLEAVED_MAGIC, channel, hi, lo, ..] => {
            Some((*channel, u16::from_be_bytes([*hi, *lo])))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        assert_eq!(encode_header(0, 19_212), [b'$', 0, 0x4B, 0x0C]);
    }

    #[test]
    fn decode_matches_encode() {
        let header = encode_header(RTCP_CHANNEL, 52);
        assert_eq!(decode_header(&header), Some((1, 52)));
    }

    #[test]
    fn decode_rejects_text() {
        assert_eq!(decode_header(b"OPTIONS"), None);
        assert_eq!(decode_header(b"$\x00"), None);
    }
}
