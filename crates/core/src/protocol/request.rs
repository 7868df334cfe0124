use crate::error::{ParseErrorKind, StreamError};

/// A parsed RTSP request (RFC 2326 §6).
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. Only the head is
/// parsed here; a body announced by [`content_length`](Self::content_length)
/// is skipped by the connection.
#[derive(Debug)]
pub struct RtspRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    /// Headers as ordered (name, value) pairs, names as received.
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    /// Parse a complete request head (request line, headers, blank line).
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines().skip_while(|line| line.trim().is_empty());

        let request_line = lines.next().ok_or(StreamError::Parse {
            kind: ParseErrorKind::EmptyRequest,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let [method, uri, version] = parts[..] else {
            return Err(StreamError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        };

        if !version.starts_with("RTSP/") {
            return Err(StreamError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }
        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }

            let (name, value) = line.split_once(':').ok_or(StreamError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(RtspRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// Parse raw socket bytes, rejecting non-UTF-8 input.
    pub fn parse_bytes(raw: &[u8]) -> crate::error::Result<Self> {
        let text = std::str::from_utf8(raw).map_err(|_| StreamError::Parse {
            kind: ParseErrorKind::InvalidEncoding,
        })?;
        Self::parse(text)
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The `CSeq` header (RFC 2326 §12.17), echoed verbatim in the response.
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq").filter(|value| !value.is_empty())
    }

    /// Body length from `Content-Length` (RFC 2326 §12.14), zero if absent.
    pub fn content_length(&self) -> crate::error::Result<usize> {
        match self.get_header("Content-Length") {
            None => Ok(0),
            Some(value) => value.parse().map_err(|_| StreamError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            }),
        }
    }

    /// Session id from the `Session` header, without a `;timeout=` suffix.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}
