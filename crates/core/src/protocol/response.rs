/// An RTSP response (RFC 2326 §7).
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 2\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Built by chaining [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body); `Content-Length` is appended by
/// [`serialize`](Self::serialize) when a body is present.
#[must_use]
#[derive(Debug)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Value of the `Server` header (RFC 2326 §12.36).
pub const SERVER_AGENT: &str = "camstream/0.1";

impl RtspResponse {
    /// A response with `CSeq` already set, as every reply needs one.
    pub fn new(status_code: u16, status_text: &str, cseq: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![
                ("CSeq".to_string(), cseq.to_string()),
                ("Server".to_string(), SERVER_AGENT.to_string()),
            ],
            body: None,
        }
    }

    pub fn ok(cseq: &str) -> Self {
        Self::new(200, "OK", cseq)
    }

    pub fn bad_request(cseq: &str) -> Self {
        Self::new(400, "Bad Request", cseq)
    }

    pub fn not_implemented(cseq: &str) -> Self {
        Self::new(501, "Not Implemented", cseq)
    }

    pub fn session_not_found(cseq: &str) -> Self {
        Self::new(454, "Session Not Found", cseq)
    }

    /// 455: e.g. PLAY before SETUP (RFC 2326 §11.3.6).
    pub fn method_not_valid_in_state(cseq: &str) -> Self {
        Self::new(455, "Method Not Valid in This State", cseq)
    }

    pub fn unsupported_transport(cseq: &str) -> Self {
        Self::new(461, "Unsupported Transport", cseq)
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Serialize to the RTSP text wire format.
    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }
}
