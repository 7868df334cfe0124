/// Transport value the server answers every accepted SETUP with.
///
/// RTP always travels inside the RTSP connection on channels 0 (RTP) and
/// 1 (RTCP), RFC 2326 §10.12.
pub const INTERLEAVED_TRANSPORT: &str = "RTP/AVP/TCP;unicast;interleaved=0-1";

/// Lower transport requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerTransport {
    Tcp,
    Udp,
}

/// Client-side view of the `Transport` header (RFC 2326 §12.39).
///
/// ```text
/// Transport: RTP/AVP/TCP;unicast;interleaved=0-1   -> Tcp, Some((0, 1))
/// Transport: RTP/AVP;unicast;client_port=8000-8001 -> Udp, None
/// ```
///
/// A header may list several alternatives separated by commas; the
/// first interleaved one wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub lower: LowerTransport,
    pub interleaved: Option<(u8, u8)>,
}

impl TransportHeader {
    pub fn parse(header: &str) -> Option<Self> {
        let specs: Vec<Self> = header.split(',').filter_map(Self::parse_spec).collect();
        specs
            .iter()
            .find(|spec| spec.lower == LowerTransport::Tcp)
            .or_else(|| specs.first())
            .cloned()
    }

    fn parse_spec(spec: &str) -> Option<Self> {
        let mut parts = spec.split(';').map(str::trim);
        let protocol = parts.next()?;
        let lower = match protocol.to_ascii_uppercase().as_str() {
            "RTP/AVP/TCP" => LowerTransport::Tcp,
            "RTP/AVP" | "RTP/AVP/UDP" => LowerTransport::Udp,
            _ => return None,
        };

        let interleaved = parts
            .filter_map(|part| part.strip_prefix("interleaved="))
            .find_map(|channels| {
                let (rtp, rtcp) = channels.split_once('-').unwrap_or((channels, channels));
                Some((rtp.parse().ok()?, rtcp.parse().ok()?))
            });

        // interleaved= implies TCP even if the profile omitted it
        let lower = if interleaved.is_some() {
            LowerTransport::Tcp
        } else {
            lower
        };

        Some(TransportHeader { lower, interleaved })
    }

    pub fn is_interleaved(&self) -> bool {
        self.lower == LowerTransport::Tcp
    }
}
