use std::ops::Range;

use super::interleaved::{self, INTERLEAVED_HEADER_LEN, RTP_CHANNEL};
use super::rtp::{RTP_HEADER_LEN, RtpHeader};

/// Largest RTP payload that fits the 16-bit interleave length field.
pub const MAX_RTP_PAYLOAD: usize = u16::MAX as usize - RTP_HEADER_LEN;

/// Interleave prefix plus RTP header.
pub const PACKET_PREFIX_LEN: usize = INTERLEAVED_HEADER_LEN + RTP_HEADER_LEN;

/// One interleaved RTP packet, described without copying pixel data.
///
/// The wire bytes are `prefix` followed by `frame[payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    prefix: [u8; PACKET_PREFIX_LEN],
    payload: Range<usize>,
}

impl Packet {
    /// `$`, channel, length, then the 12-byte RTP header.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// This packet's slice of the frame it was planned for.
    pub fn payload<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        &frame[self.payload.clone()]
    }

    pub fn wire_len(&self) -> usize {
        PACKET_PREFIX_LEN + self.payload.len()
    }

    pub fn is_last(&self) -> bool {
        self.prefix[INTERLEAVED_HEADER_LEN + 1] & 0x80 != 0
    }
}

/// Packetizer for raw (unencoded) frames carried over interleaved RTP.
///
/// A frame that fits in one RTP packet is sent as exactly one packet with
/// the marker bit set, so the sequence number advances once per frame.
/// Larger frames are split into `ceil(len / max_payload)` packets that
/// share the frame's timestamp; only the last carries the marker.
#[derive(Debug)]
pub struct RawFramePacketizer {
    header: RtpHeader,
    max_payload: usize,
}

impl RawFramePacketizer {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc),
            max_payload: MAX_RTP_PAYLOAD,
        }
    }

    pub fn with_random_ssrc(pt: u8) -> Self {
        Self {
            header: RtpHeader::with_random_ssrc(pt),
            max_payload: MAX_RTP_PAYLOAD,
        }
    }

    /// Cap the RTP payload per packet (clamped to `1..=MAX_RTP_PAYLOAD`).
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload.clamp(1, MAX_RTP_PAYLOAD);
        self
    }

    pub fn payload_type(&self) -> u8 {
        self.header.pt
    }

    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    /// Sequence number of the next packet (for `RTP-Info`).
    pub fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    /// Timestamp of the next frame (for `RTP-Info`).
    pub fn next_rtp_timestamp(&self) -> u32 {
        self.header.timestamp()
    }

    /// Plan the packets for a frame of `frame_len` bytes, then advance the
    /// timestamp by `timestamp_increment`.
    pub fn packetize(&mut self, frame_len: usize, timestamp_increment: u32) -> Vec<Packet> {
        let count = frame_len.div_ceil(self.max_payload).max(1);
        let mut packets = Vec::with_capacity(count);

        for index in 0..count {
            let start = index * self.max_payload;
            let end = (start + self.max_payload).min(frame_len);
            let rtp_len = (RTP_HEADER_LEN + (end - start)) as u16;

            let mut prefix = [0u8; PACKET_PREFIX_LEN];
            prefix[..INTERLEAVED_HEADER_LEN]
                .copy_from_slice(&interleaved::encode_header(RTP_CHANNEL, rtp_len));
            prefix[INTERLEAVED_HEADER_LEN..]
                .copy_from_slice(&self.header.encode(index + 1 == count));

            packets.push(Packet {
                prefix,
                payload: start..end,
            });
        }

        self.header.advance_timestamp(timestamp_increment);
        packets
    }
}
