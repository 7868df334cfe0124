use std::io::{self, BufRead, BufReader, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::config::StreamConfig;
use crate::error::{ParseErrorKind, StreamError};
use crate::media::MediaStream;
use crate::media::interleaved::{self, INTERLEAVED_HEADER_LEN, INTERLEAVED_MAGIC};
use crate::protocol::{Action, MethodHandler, RtspRequest, RtspResponse};
use crate::session::{RtspSession, SessionLease, SessionTable};

/// Requests with a longer head or body than this are treated as malformed.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// Everything a connection handler shares with the rest of the server.
#[derive(Clone)]
pub struct RtspContext {
    pub sessions: SessionTable,
    pub stream: Arc<MediaStream>,
    pub config: Arc<StreamConfig>,
}

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::StreamServer::stop`] can terminate it promptly.
/// A connection arriving while every session slot is taken is closed
/// immediately.
pub fn accept_loop(listener: TcpListener, context: RtspContext, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if let Err(e) = configure(&stream, &context.config) {
                    tracing::warn!(%peer_addr, error = %e, "failed to configure client socket");
                    continue;
                }
                let writer = match stream.try_clone() {
                    Ok(writer) => writer,
                    Err(e) => {
                        tracing::warn!(%peer_addr, error = %e, "failed to clone client socket");
                        continue;
                    }
                };

                let lease = match context.sessions.claim(peer_addr, writer) {
                    Ok(lease) => lease,
                    Err(e) => {
                        tracing::warn!(%peer_addr, error = %e, "refusing RTSP connection");
                        let _ = stream.shutdown(Shutdown::Both);
                        continue;
                    }
                };

                let context = context.clone();
                let running = running.clone();
                let spawned = thread::Builder::new()
                    .name(format!("rtsp-client-{}", lease.index()))
                    .spawn(move || Connection::handle(stream, peer_addr, lease, context, running));
                if let Err(e) = spawned {
                    tracing::error!(%peer_addr, error = %e, "failed to spawn connection handler");
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

fn configure(stream: &TcpStream, config: &StreamConfig) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(config.socket_read_timeout))?;
    stream.set_write_timeout(Some(config.socket_write_timeout))?;
    Ok(())
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// A single RTSP client connection with its own lifecycle.
///
/// Reads go through `reader`; every write (responses here, media from the
/// pump) goes through the socket held by the session slot.
struct Connection {
    reader: BufReader<TcpStream>,
    lease: SessionLease,
    handler: MethodHandler,
    peer_addr: SocketAddr,
}

impl Connection {
    fn handle(
        stream: TcpStream,
        peer_addr: SocketAddr,
        lease: SessionLease,
        context: RtspContext,
        running: Arc<AtomicBool>,
    ) {
        tracing::info!(%peer_addr, slot = lease.index(), "client connected");

        let handler = MethodHandler::new(
            RtspSession::new(lease.index(), peer_addr),
            lease.slot().session_id(),
            stream.local_addr().ok(),
            context.stream,
            context.config,
        );

        let mut conn = Connection {
            reader: BufReader::new(stream),
            lease,
            handler,
            peer_addr,
        };

        let reason = conn.run(&running);
        conn.handler.close();

        tracing::info!(%peer_addr, slot = conn.lease.index(), reason, "client disconnected");
        // dropping the lease closes the socket and frees the slot
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &AtomicBool) -> &'static str {
        let mut head: Vec<u8> = Vec::new();
        let mut line: Vec<u8> = Vec::new();

        while running.load(Ordering::SeqCst) {
            if head.is_empty() && line.is_empty() {
                let next = match self.reader.fill_buf() {
                    Ok(buf) => buf.first().copied(),
                    Err(ref e) if is_timeout(e) => continue,
                    Err(_) => return "read error",
                };
                match next {
                    None => return "connection closed by client",
                    Some(INTERLEAVED_MAGIC) => {
                        if let Err(e) = self.skip_interleaved() {
                            tracing::debug!(
                                peer = %self.peer_addr,
                                error = %e,
                                "interleaved read failed"
                            );
                            return "read error";
                        }
                        continue;
                    }
                    Some(_) => {}
                }
            }

            match self.reader.read_until(b'\n', &mut line) {
                Ok(0) => return "connection closed by client",
                Ok(_) => {}
                // partial line stays in `line`
                Err(ref e) if is_timeout(e) => continue,
                Err(_) => return "read error",
            }
            if !line.ends_with(b"\n") {
                continue;
            }

            let blank = line.as_slice() == b"\r\n" || line.as_slice() == b"\n";
            head.append(&mut line);
            if head.len() > MAX_REQUEST_HEAD {
                tracing::warn!(peer = %self.peer_addr, len = head.len(), "request head too long");
                return "request too long";
            }
            if !blank {
                continue;
            }
            if head.iter().all(u8::is_ascii_whitespace) {
                head.clear();
                continue;
            }

            let outcome = self.process(&head, running);
            head.clear();
            if let Some(reason) = outcome {
                return reason;
            }
        }

        "server shutting down"
    }

    /// Handle one complete request head. `Some(reason)` ends the connection.
    fn process(&mut self, head: &[u8], running: &AtomicBool) -> Option<&'static str> {
        let request = match RtspRequest::parse_bytes(head) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                self.reject(None, &e);
                return Some("parse error");
            }
        };

        match request.content_length() {
            Ok(0) => {}
            Ok(len) if len <= MAX_REQUEST_HEAD => {
                if let Err(e) = self.skip_body(len, running) {
                    tracing::debug!(peer = %self.peer_addr, error = %e, "request body read failed");
                    return Some("read error");
                }
            }
            Ok(len) => {
                tracing::warn!(peer = %self.peer_addr, len, "request body too long");
                self.reject(
                    Some(&request),
                    &StreamError::Parse {
                        kind: ParseErrorKind::InvalidHeader,
                    },
                );
                return Some("request too long");
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                self.reject(Some(&request), &e);
                return Some("parse error");
            }
        }

        tracing::debug!(
            peer = %self.peer_addr,
            method = %request.method,
            uri = %request.uri,
            cseq = request.cseq().unwrap_or("-"),
            "request"
        );

        let reply = match self.handler.handle(&request) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    peer = %self.peer_addr,
                    method = %request.method,
                    error = %e,
                    "rejected request"
                );
                self.reject(Some(&request), &e);
                return Some("protocol error");
            }
        };

        tracing::debug!(
            peer = %self.peer_addr,
            status = reply.response.status_code,
            "response"
        );

        let slot = self.lease.slot();
        if reply.action == Action::Close {
            // no media after the TEARDOWN reply
            slot.set_playing(false);
        }
        if let Err(e) = slot.send_control(reply.response.serialize().as_bytes()) {
            tracing::debug!(peer = %self.peer_addr, error = %e, "response write failed");
            return Some("write error");
        }

        match reply.action {
            Action::Continue => None,
            Action::StartPlaying => {
                slot.set_playing(true);
                None
            }
            Action::Close => Some("teardown"),
        }
    }

    /// Best-effort error response before the connection is closed.
    fn reject(&self, request: Option<&RtspRequest>, error: &StreamError) {
        let cseq = request.and_then(RtspRequest::cseq).unwrap_or("0");
        let response = match error {
            StreamError::Parse {
                kind: ParseErrorKind::UnknownMethod(_),
            } => RtspResponse::not_implemented(cseq),
            _ => RtspResponse::bad_request(cseq),
        };
        let _ = self
            .lease
            .slot()
            .send_control(response.serialize().as_bytes());
    }

    /// Discard a request body of `len` bytes. Parameter lists sent with
    /// GET_PARAMETER are not interpreted.
    fn skip_body(&mut self, len: usize, running: &AtomicBool) -> io::Result<()> {
        let mut remaining = len;
        while remaining > 0 {
            let available = match self.reader.fill_buf() {
                Ok([]) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(buf) => buf.len().min(remaining),
                Err(ref e) if is_timeout(e) && running.load(Ordering::SeqCst) => continue,
                Err(e) => return Err(e),
            };
            self.reader.consume(available);
            remaining -= available;
        }
        tracing::trace!(peer = %self.peer_addr, len, "discarded request body");
        Ok(())
    }

    /// Consume one `$`-framed packet sent by the client (RTCP receiver
    /// reports) without interpreting it.
    fn skip_interleaved(&mut self) -> io::Result<()> {
        let mut header = [0u8; INTERLEAVED_HEADER_LEN];
        self.reader.read_exact(&mut header)?;
        let Some((channel, len)) = interleaved::decode_header(&header) else {
            return Err(io::ErrorKind::InvalidData.into());
        };
        let skipped = io::copy(
            &mut (&mut self.reader).take(u64::from(len)),
            &mut io::sink(),
        )?;
        if skipped < u64::from(len) {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        tracing::trace!(
            peer = %self.peer_addr,
            channel,
            len,
            "discarded interleaved packet from client"
        );
        Ok(())
    }
}
