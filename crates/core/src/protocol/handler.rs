use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::StreamConfig;
use crate::error::{ParseErrorKind, Result, StreamError};
use crate::media::MediaStream;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp;
use crate::session::transport::INTERLEAVED_TRANSPORT;
use crate::session::{RtspSession, SessionState, TransportHeader};

pub const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN, GET_PARAMETER";

/// What the connection must do once the response has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    /// Start media delivery to this connection.
    StartPlaying,
    /// Close the connection.
    Close,
}

#[derive(Debug)]
pub struct Reply {
    pub response: RtspResponse,
    pub action: Action,
}

impl Reply {
    fn send(response: RtspResponse) -> Self {
        Self {
            response,
            action: Action::Continue,
        }
    }

    fn then(mut self, action: Action) -> Self {
        self.action = action;
        self
    }
}

/// Runs the RTSP state machine for a single TCP connection.
///
/// | Method        | Allowed in     | Effect     |
/// |---------------|----------------|------------|
/// | OPTIONS       | any            | none       |
/// | DESCRIBE      | any            | none       |
/// | SETUP         | Init, Ready    | → Ready    |
/// | PLAY          | Ready, Playing | → Playing  |
/// | TEARDOWN      | any            | → Closed   |
/// | GET_PARAMETER | any            | none       |
///
/// A method outside its allowed states gets `455` and changes nothing.
/// An unknown method is a parse error and ends the connection.
pub struct MethodHandler {
    session: RtspSession,
    slot_session_id: u32,
    local_addr: Option<SocketAddr>,
    stream: Arc<MediaStream>,
    config: Arc<StreamConfig>,
}

impl MethodHandler {
    pub fn new(
        session: RtspSession,
        slot_session_id: u32,
        local_addr: Option<SocketAddr>,
        stream: Arc<MediaStream>,
        config: Arc<StreamConfig>,
    ) -> Self {
        MethodHandler {
            session,
            slot_session_id,
            local_addr,
            stream,
            config,
        }
    }

    pub fn session(&self) -> &RtspSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// Mark the session closed after a socket error.
    pub fn close(&mut self) {
        self.session.transition(SessionState::Closed);
    }

    /// Handle one request.
    ///
    /// Errors are connection-fatal: a missing `CSeq` (when required) or an
    /// unknown method.
    pub fn handle(&mut self, request: &RtspRequest) -> Result<Reply> {
        let cseq = match request.cseq() {
            Some(cseq) => cseq,
            None if self.config.require_cseq => {
                return Err(StreamError::Parse {
                    kind: ParseErrorKind::MissingCseq,
                });
            }
            None => "0",
        };
        self.session.cseq_last_seen = Some(cseq.to_string());

        match request.method.as_str() {
            "OPTIONS" => Ok(self.handle_options(cseq)),
            "DESCRIBE" => Ok(self.handle_describe(cseq, &request.uri)),
            "SETUP" => Ok(self.handle_setup(cseq, request)),
            "PLAY" => Ok(self.handle_play(cseq, request)),
            "TEARDOWN" => Ok(self.handle_teardown(cseq)),
            "GET_PARAMETER" => Ok(self.handle_get_parameter(cseq)),
            other => {
                tracing::warn!(
                    method = other,
                    %cseq,
                    slot = self.session.id,
                    "unsupported RTSP method"
                );
                Err(StreamError::Parse {
                    kind: ParseErrorKind::UnknownMethod(other.to_string()),
                })
            }
        }
    }

    fn handle_options(&self, cseq: &str) -> Reply {
        tracing::debug!(%cseq, "OPTIONS");
        Reply::send(RtspResponse::ok(cseq).add_header("Public", PUBLIC_METHODS))
    }

    /// Host for SDP: configured public host, then the request URI host,
    /// then the local address the client connected to.
    fn advertised_host(&self, uri: &str) -> String {
        if let Some(host) = &self.config.public_host {
            return host.clone();
        }

        if let Some(after_scheme) = uri.strip_prefix("rtsp://") {
            let authority = after_scheme.split('/').next().unwrap_or("");
            let host = match authority.strip_prefix('[') {
                // [v6addr]:port
                Some(bracketed) => bracketed.split(']').next().unwrap_or(""),
                None => authority.split(':').next().unwrap_or(""),
            }
            .trim();
            if !host.is_empty() {
                return host.to_string();
            }
        }

        self.local_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| self.session.peer_addr.ip().to_string())
    }

    fn handle_describe(&self, cseq: &str, uri: &str) -> Reply {
        tracing::debug!(%cseq, uri, "DESCRIBE");
        let host = self.advertised_host(uri);
        let body = sdp::generate_sdp(&self.stream, &host, &self.config.sdp_session_name);

        Reply::send(
            RtspResponse::ok(cseq)
                .add_header("Content-Type", "application/sdp")
                .add_header("Content-Base", &format!("{}/", uri.trim_end_matches('/')))
                .with_body(body),
        )
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> Reply {
        if !matches!(self.session.state, SessionState::Init | SessionState::Ready) {
            tracing::warn!(%cseq, state = ?self.session.state, "SETUP not valid in state");
            return Reply::send(RtspResponse::method_not_valid_in_state(cseq));
        }

        if let Some(header) = request.get_header("Transport") {
            match TransportHeader::parse(header) {
                Some(transport) if transport.is_interleaved() => {}
                _ => {
                    tracing::warn!(
                        %cseq,
                        transport = header,
                        "client requested non-interleaved transport"
                    );
                    return Reply::send(
                        RtspResponse::unsupported_transport(cseq)
                            .add_header("Transport", INTERLEAVED_TRANSPORT),
                    );
                }
            }
        }

        let session_id = *self.session.session_id.get_or_insert(self.slot_session_id);
        self.session.transition(SessionState::Ready);

        tracing::info!(
            slot = self.session.id,
            session_id,
            peer = %self.session.peer_addr,
            uri = %request.uri,
            "session set up"
        );

        Reply::send(
            RtspResponse::ok(cseq)
                .add_header("Transport", INTERLEAVED_TRANSPORT)
                .add_header("Session", &session_id.to_string()),
        )
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> Reply {
        let Some(session_id) = self.session.session_id else {
            tracing::warn!(%cseq, "PLAY before SETUP");
            return Reply::send(RtspResponse::method_not_valid_in_state(cseq));
        };
        if !matches!(self.session.state, SessionState::Ready | SessionState::Playing) {
            return Reply::send(RtspResponse::method_not_valid_in_state(cseq));
        }
        if let Some(requested) = request.session_id()
            && requested != session_id.to_string()
        {
            tracing::warn!(%cseq, requested, session_id, "PLAY for unknown session");
            return Reply::send(RtspResponse::session_not_found(cseq));
        }

        self.session.transition(SessionState::Playing);
        tracing::info!(slot = self.session.id, session_id, "session started playing");

        let rtp_info = format!(
            "url={}/streamid=0;seq={};rtptime={}",
            request.uri.trim_end_matches('/'),
            self.stream.next_sequence(),
            self.stream.next_rtp_timestamp()
        );

        Reply::send(
            RtspResponse::ok(cseq)
                .add_header("Session", &session_id.to_string())
                .add_header("Range", "npt=0.000-")
                .add_header("RTP-Info", &rtp_info),
        )
        .then(Action::StartPlaying)
    }

    fn handle_teardown(&mut self, cseq: &str) -> Reply {
        self.session.transition(SessionState::Closed);
        tracing::info!(
            slot = self.session.id,
            session_id = ?self.session.session_id,
            "session terminated via TEARDOWN"
        );

        let mut response = RtspResponse::ok(cseq);
        if let Some(session_id) = self.session.session_id {
            response = response.add_header("Session", &session_id.to_string());
        }
        Reply::send(response).then(Action::Close)
    }

    /// Keep-alive used by VLC and ffmpeg (RFC 2326 §10.8).
    fn handle_get_parameter(&self, cseq: &str) -> Reply {
        tracing::trace!(%cseq, "GET_PARAMETER keepalive");
        let mut response = RtspResponse::ok(cseq);
        if let Some(session_id) = self.session.session_id {
            response = response.add_header("Session", &session_id.to_string());
        }
        Reply::send(response)
    }
}
