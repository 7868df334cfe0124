use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::Duration;

use crate::error::{Result, StreamError};

/// `"PV"` read as a little-endian u16.
pub const FPV_MAGIC: u16 = 0x5056;

/// Four little-endian u16 fields.
pub const FRAGMENT_HEADER_LEN: usize = 8;

/// Header carried by every FPV datagram.
///
/// ```text
///  0       2          4           6               8
/// +-------+----------+-----------+---------------+----------------
/// | magic | frame_id | packet_id | total_packets | payload chunk ...
/// +-------+----------+-----------+---------------+----------------
/// ```
///
/// All fields are little-endian. Fragments of one frame share `frame_id`;
/// `packet_id` counts from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub frame_id: u16,
    pub packet_id: u16,
    pub total_packets: u16,
}

impl FragmentHeader {
    pub fn encode(&self) -> [u8; FRAGMENT_HEADER_LEN] {
        let mut buf = [0u8; FRAGMENT_HEADER_LEN];
        buf[0..2].copy_from_slice(&FPV_MAGIC.to_le_bytes());
        buf[2..4].copy_from_slice(&self.frame_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.packet_id.to_le_bytes());
        buf[6..8].copy_from_slice(&self.total_packets.to_le_bytes());
        buf
    }

    /// Split a datagram into header and payload. `None` if it is too short
    /// or does not start with the magic.
    pub fn decode(datagram: &[u8]) -> Option<(Self, &[u8])> {
        if datagram.len() < FRAGMENT_HEADER_LEN {
            return None;
        }
        let field = |at: usize| u16::from_le_bytes([datagram[at], datagram[at + 1]]);
        if field(0) != FPV_MAGIC {
            return None;
        }
        let header = FragmentHeader {
            frame_id: field(2),
            packet_id: field(4),
            total_packets: field(6),
        };
        Some((header, &datagram[FRAGMENT_HEADER_LEN..]))
    }
}

/// Check that datagrams of `max_udp_payload` bytes can carry a frame of
/// `max_frame_bytes` without overflowing the u16 fragment counters.
pub fn validate_limits(max_udp_payload: usize, max_frame_bytes: usize) -> Result<()> {
    if max_udp_payload <= FRAGMENT_HEADER_LEN {
        return Err(StreamError::InvalidConfig(format!(
            "max_udp_payload {max_udp_payload} must exceed the {FRAGMENT_HEADER_LEN}-byte fragment header"
        )));
    }
    let max_fragments = max_frame_bytes.div_ceil(max_udp_payload - FRAGMENT_HEADER_LEN);
    if max_fragments > usize::from(u16::MAX) {
        return Err(StreamError::InvalidConfig(format!(
            "max_fpv_frame_bytes {max_frame_bytes} needs {max_fragments} fragments (limit {})",
            u16::MAX
        )));
    }
    Ok(())
}

/// Split `data` into `(header, chunk)` pairs of at most `chunk_size` bytes.
///
/// An empty frame still yields one header-only fragment so the receiver
/// sees the frame id advance. Fails with [`StreamError::FrameTooLarge`]
/// when the frame needs more fragments than `total_packets` can count.
pub fn fragment(
    data: &[u8],
    frame_id: u16,
    chunk_size: usize,
) -> Result<Vec<(FragmentHeader, &[u8])>> {
    let chunk_size = chunk_size.max(1);
    let Ok(total_packets) = u16::try_from(data.len().div_ceil(chunk_size).max(1)) else {
        return Err(StreamError::FrameTooLarge {
            len: data.len(),
            max: usize::from(u16::MAX) * chunk_size,
        });
    };
    if data.is_empty() {
        return Ok(vec![(
            FragmentHeader {
                frame_id,
                packet_id: 0,
                total_packets,
            },
            data,
        )]);
    }

    Ok(data
        .chunks(chunk_size)
        .zip(0u16..)
        .map(|(chunk, packet_id)| {
            (
                FragmentHeader {
                    frame_id,
                    packet_id,
                    total_packets,
                },
                chunk,
            )
        })
        .collect())
}

/// Outcome of one successfully sent frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentFrame {
    pub packets: u16,
    pub bytes: usize,
}

/// Best-effort fragmenting sender for the FPV path.
///
/// Owns one datagram socket aimed at a fixed destination (unicast or
/// broadcast). No retransmission: a failed fragment aborts the rest of
/// the frame.
pub struct FpvSender {
    socket: UdpSocket,
    dest: SocketAddr,
    max_udp_payload: usize,
    max_frame_bytes: usize,
    packet_delay: Duration,
}

impl FpvSender {
    /// Bind an ephemeral socket for sending to `dest`.
    ///
    /// Limits that cannot be expressed in the fragment header are rejected
    /// with [`StreamError::InvalidConfig`] before any socket is created.
    pub fn bind(
        dest: SocketAddr,
        broadcast: bool,
        max_udp_payload: usize,
        max_frame_bytes: usize,
        packet_delay: Duration,
    ) -> Result<Self> {
        validate_limits(max_udp_payload, max_frame_bytes)?;
        let local: SocketAddr = if dest.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).map_err(StreamError::init("FPV socket"))?;
        if broadcast {
            socket
                .set_broadcast(true)
                .map_err(StreamError::init("FPV broadcast option"))?;
        }
        tracing::info!(%dest, broadcast, max_udp_payload, "FPV sender ready");
        Ok(Self {
            socket,
            dest,
            max_udp_payload,
            max_frame_bytes,
            packet_delay,
        })
    }

    pub fn dest(&self) -> SocketAddr {
        self.dest
    }

    pub fn chunk_size(&self) -> usize {
        self.max_udp_payload.saturating_sub(FRAGMENT_HEADER_LEN)
    }

    /// Fragment and send one frame.
    ///
    /// Returns [`StreamError::FrameTooLarge`] without sending anything when
    /// `data` exceeds the configured maximum, and [`StreamError::SendFailed`]
    /// on the first fragment the socket refuses.
    pub fn send_frame(&self, data: &[u8], frame_id: u16) -> Result<SentFrame> {
        if data.len() > self.max_frame_bytes {
            return Err(StreamError::FrameTooLarge {
                len: data.len(),
                max: self.max_frame_bytes,
            });
        }

        let fragments = fragment(data, frame_id, self.chunk_size())?;
        let count = fragments.len();
        let packets = fragments.first().map_or(0, |(header, _)| header.total_packets);
        let mut datagram = Vec::with_capacity(self.max_udp_payload);
        let mut bytes = 0;

        for (index, (header, chunk)) in fragments.into_iter().enumerate() {
            datagram.clear();
            datagram.extend_from_slice(&header.encode());
            datagram.extend_from_slice(chunk);

            bytes += self
                .socket
                .send_to(&datagram, self.dest)
                .map_err(StreamError::SendFailed)?;

            if index + 1 < count && !self.packet_delay.is_zero() {
                thread::sleep(self.packet_delay);
            }
        }

        tracing::trace!(frame_id, packets = count, bytes, "FPV frame sent");
        Ok(SentFrame { packets, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(fragments: &[(FragmentHeader, &[u8])]) -> Vec<u8> {
        let mut ordered = fragments.to_vec();
        ordered.sort_by_key(|(h, _)| h.packet_id);
        ordered.iter().flat_map(|(_, c)| c.iter().copied()).collect()
    }

    #[test]
    fn header_layout_is_little_endian() {
        let header = FragmentHeader {
            frame_id: 0x0102,
            packet_id: 3,
            total_packets: 19,
        };
        assert_eq!(header.encode(), [0x56, 0x50, 0x02, 0x01, 3, 0, 19, 0]);

        let mut datagram = header.encode().to_vec();
        datagram.extend_from_slice(b"px");
        let (decoded, payload) = FragmentHeader::decode(&datagram).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(payload, b"px");
    }

    #[test]
    fn decode_rejects_foreign_datagrams() {
        assert!(FragmentHeader::decode(&[0x56, 0x50, 0, 0]).is_none());
        assert!(FragmentHeader::decode(&[0xFF; 12]).is_none());
    }

    #[test]
    fn qqvga_frame_splits_into_nineteen_fragments() {
        let data: Vec<u8> = (0..19_200).map(|i| (i % 251) as u8).collect();
        let fragments = fragment(&data, 7, 1024 - FRAGMENT_HEADER_LEN).unwrap();

        assert_eq!(fragments.len(), 19);
        for (i, (header, chunk)) in fragments.iter().enumerate() {
            assert_eq!(header.frame_id, 7);
            assert_eq!(header.packet_id as usize, i);
            assert_eq!(header.total_packets, 19);
            assert!(FRAGMENT_HEADER_LEN + chunk.len() <= 1024);
        }
        let last = fragments.last().unwrap().1.len();
        assert_eq!(last, 19_200 - 18 * 1016);
        assert!(last < 1016);
        assert_eq!(reassemble(&fragments), data);
    }

    #[test]
    fn fragment_count_is_ceiling_for_many_sizes() {
        for _ in 0..200 {
            let size = rand::random::<u32>() as usize % 20_000 + 1;
            let chunk = rand::random::<u32>() as usize % 1500 + 1;
            let data: Vec<u8> = (0..size).map(|_| rand::random::<u8>()).collect();

            let fragments = fragment(&data, 1, chunk).unwrap();
            assert_eq!(fragments.len(), size.div_ceil(chunk));
            assert!(fragments.iter().all(|(h, _)| h.total_packets as usize == fragments.len()));

            // Delivery order does not matter to the receiver.
            let mut shuffled = fragments.clone();
            shuffled.reverse();
            assert_eq!(reassemble(&shuffled), data);
        }
    }

    #[test]
    fn empty_frame_sends_one_header() {
        let fragments = fragment(&[], 9, 1016).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].0.total_packets, 1);
        assert!(fragments[0].1.is_empty());
    }

    #[test]
    fn fragment_counter_overflow_is_an_error() {
        let data = vec![0u8; 70_000];
        assert!(matches!(
            fragment(&data, 0, 1),
            Err(StreamError::FrameTooLarge { len: 70_000, max: 65_535 })
        ));

        let fragments = fragment(&data[..65_535], 0, 1).unwrap();
        let (last, _) = fragments.last().unwrap();
        assert_eq!(last.total_packets, u16::MAX);
        assert_eq!(last.packet_id, u16::MAX - 1);
    }

    #[test]
    fn bind_rejects_unrepresentable_limits() {
        let dest: SocketAddr = "127.0.0.1:9".parse().unwrap();
        for payload in [0, FRAGMENT_HEADER_LEN] {
            assert!(matches!(
                FpvSender::bind(dest, false, payload, 1024, Duration::ZERO),
                Err(StreamError::InvalidConfig(_))
            ));
        }
        assert!(matches!(
            FpvSender::bind(dest, false, 9, 1_000_000, Duration::ZERO),
            Err(StreamError::InvalidConfig(_))
        ));

        let sender =
            FpvSender::bind(dest, false, 9, usize::from(u16::MAX), Duration::ZERO).unwrap();
        assert_eq!(sender.chunk_size(), 1);
    }

    #[test]
    fn oversized_frame_is_rejected_before_sending() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sender = FpvSender::bind(
            receiver.local_addr().unwrap(),
            false,
            1024,
            100,
            Duration::ZERO,
        )
        .unwrap();

        let err = sender.send_frame(&[0u8; 101], 0).unwrap_err();
        assert!(matches!(err, StreamError::FrameTooLarge { len: 101, max: 100 }));
    }

    #[test]
    fn frame_arrives_over_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let sender = FpvSender::bind(
            receiver.local_addr().unwrap(),
            false,
            64,
            4096,
            Duration::from_millis(1),
        )
        .unwrap();

        let data: Vec<u8> = (0..300).map(|i| i as u8).collect();
        let sent = sender.send_frame(&data, 42).unwrap();
        assert_eq!(sent.packets, 6);
        assert_eq!(sent.bytes, 300 + 6 * FRAGMENT_HEADER_LEN);

        let mut buf = [0u8; 128];
        let mut received = Vec::new();
        for _ in 0..6 {
            let n = receiver.recv(&mut buf).unwrap();
            let (header, payload) = FragmentHeader::decode(&buf[..n]).unwrap();
            assert_eq!(header.frame_id, 42);
            received.push((header.packet_id, payload.to_vec()));
        }
        received.sort_by_key(|(id, _)| *id);
        let joined: Vec<u8> = received.into_iter().flat_map(|(_, p)| p).collect();
        assert_eq!(joined, data);
    }
}
