//! Integration tests: RTSP clients and an FPV receiver against a running
//! server fed by the test pattern.
//!
//! Every server binds port 0 so tests can run in parallel.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use camstream::{FragmentHeader, PixelFormat, StreamConfig, StreamServer, TestPatternSource};

const WIDTH: u32 = 16;
const HEIGHT: u32 = 8;
const FRAME_BYTES: usize = (WIDTH * HEIGHT * 2) as usize;

fn test_config() -> StreamConfig {
    StreamConfig {
        rtsp_bind: "127.0.0.1:0".parse().unwrap(),
        target_fps: 20,
        frame_width: WIDTH,
        frame_height: HEIGHT,
        pixel_format: PixelFormat::Rgb565,
        fpv_dest: None,
        stats_interval: None,
        ..Default::default()
    }
}

fn start_server(config: StreamConfig) -> (StreamServer, Arc<TestPatternSource>) {
    let source = Arc::new(
        TestPatternSource::new(
            config.frame_width,
            config.frame_height,
            config.pixel_format,
            4,
        )
        .unwrap()
        .with_frame_rate(config.target_fps * 2),
    );
    let mut server = StreamServer::new(config).unwrap();
    server.start(source.clone()).expect("server start");
    (server, source)
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

/// One interleaved packet as received by a client.
struct RtpPacket {
    channel: u8,
    marker: bool,
    payload_type: u8,
    sequence: u16,
    timestamp: u32,
    payload: Vec<u8>,
}

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    uri: String,
    cseq: u32,
}

impl Client {
    fn connect(server: &StreamServer) -> Client {
        let addr = server.local_rtsp_addr().unwrap();
        let stream =
            TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect to server");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        stream
            .set_write_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        Client {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
            uri: format!("rtsp://127.0.0.1:{}/stream", addr.port()),
            cseq: 0,
        }
    }

    fn request(&mut self, method: &str, extra_headers: &str) -> std::io::Result<String> {
        self.cseq += 1;
        let request = format!(
            "{method} {} RTSP/1.0\r\nCSeq: {}\r\n{extra_headers}\r\n",
            self.uri, self.cseq
        );
        self.send_raw(&request)?;
        self.read_response()
    }

    fn send_raw(&mut self, text: &str) -> std::io::Result<()> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.flush()
    }

    /// Read the next RTSP response, skipping media that arrives first.
    fn read_response(&mut self) -> std::io::Result<String> {
        while self.reader.fill_buf()?.first() == Some(&b'$') {
            self.read_packet()?;
        }

        let mut response = String::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                break;
            }
            response.push_str(&line);
            if line == "\r\n" || line == "\n" {
                break;
            }
        }

        // Parse Content-Length and read body if present
        if let Some(len) = header(&response, "Content-Length").and_then(|v| v.parse::<usize>().ok())
            && len > 0
        {
            let mut body = vec![0u8; len];
            self.reader.read_exact(&mut body)?;
            response.push_str(&String::from_utf8_lossy(&body));
        }

        Ok(response)
    }

    fn read_packet(&mut self) -> std::io::Result<RtpPacket> {
        let mut prefix = [0u8; 4];
        self.reader.read_exact(&mut prefix)?;
        assert_eq!(prefix[0], b'$', "expected interleaved frame");
        let len = u16::from_be_bytes([prefix[2], prefix[3]]) as usize;
        let mut packet = vec![0u8; len];
        self.reader.read_exact(&mut packet)?;

        assert!(len >= 12);
        assert_eq!(packet[0] >> 6, 2, "RTP version");
        Ok(RtpPacket {
            channel: prefix[1],
            marker: packet[1] & 0x80 != 0,
            payload_type: packet[1] & 0x7F,
            sequence: u16::from_be_bytes([packet[2], packet[3]]),
            timestamp: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            payload: packet[12..].to_vec(),
        })
    }

    /// SETUP + PLAY, returning the session id.
    fn play(&mut self) -> String {
        let setup = self
            .request("SETUP", "Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n")
            .expect("SETUP response");
        assert!(setup.starts_with("RTSP/1.0 200 OK"), "SETUP: {setup}");
        let session = header(&setup, "Session").expect("Session header").to_string();

        let play = self
            .request("PLAY", &format!("Session: {session}\r\n"))
            .expect("PLAY response");
        assert!(play.starts_with("RTSP/1.0 200 OK"), "PLAY: {play}");
        session
    }

    /// True once the server has closed the connection.
    fn is_closed(&mut self) -> bool {
        let mut rest = Vec::new();
        match self.reader.read_to_end(&mut rest) {
            Ok(_) => true,
            Err(e) => e.kind() == std::io::ErrorKind::ConnectionReset,
        }
    }
}

fn header<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response
        .lines()
        .find(|l| l.to_lowercase().starts_with(&format!("{}:", name.to_lowercase())))
        .and_then(|l| l.split_once(':'))
        .map(|(_, v)| v.trim())
}

fn status_line(response: &str) -> &str {
    response.lines().next().unwrap_or("")
}

#[test]
fn full_handshake_options_describe_setup_play_teardown() {
    let (mut server, _source) = start_server(test_config());
    let mut client = Client::connect(&server);

    let options = client.request("OPTIONS", "").expect("OPTIONS response");
    assert_eq!(status_line(&options), "RTSP/1.0 200 OK");
    assert_eq!(header(&options, "CSeq"), Some("1"));
    let public = header(&options, "Public").expect("Public header");
    for method in ["OPTIONS", "DESCRIBE", "SETUP", "PLAY", "TEARDOWN"] {
        assert!(public.contains(method), "Public lacks {method}: {public}");
    }

    let describe = client
        .request("DESCRIBE", "Accept: application/sdp\r\n")
        .expect("DESCRIBE response");
    assert_eq!(status_line(&describe), "RTSP/1.0 200 OK");
    assert_eq!(header(&describe, "Content-Type"), Some("application/sdp"));
    assert!(describe.contains("v=0"), "SDP body missing v=0");
    assert!(describe.contains("m=video 0 RTP/AVP 96"));
    assert!(describe.contains("a=rtpmap:96 raw/90000"));
    assert!(describe.contains("sampling=RGB565; width=16; height=8"));

    let setup = client
        .request("SETUP", "Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n")
        .expect("SETUP response");
    assert_eq!(status_line(&setup), "RTSP/1.0 200 OK");
    assert_eq!(
        header(&setup, "Transport"),
        Some("RTP/AVP/TCP;unicast;interleaved=0-1")
    );
    let session = header(&setup, "Session").expect("Session header").to_string();
    assert!(session.parse::<u32>().is_ok(), "session id {session}");

    let play = client
        .request("PLAY", &format!("Session: {session}\r\n"))
        .expect("PLAY response");
    assert_eq!(status_line(&play), "RTSP/1.0 200 OK");
    assert_eq!(header(&play, "Session"), Some(session.as_str()));
    assert!(header(&play, "RTP-Info").is_some(), "PLAY: missing RTP-Info");

    let first = client.read_packet().expect("first frame");
    let second = client.read_packet().expect("second frame");
    for packet in [&first, &second] {
        assert_eq!(packet.channel, 0);
        assert_eq!(packet.payload_type, 96);
        assert!(packet.marker);
        assert_eq!(packet.payload.len(), FRAME_BYTES);
    }
    assert_eq!(second.sequence, first.sequence.wrapping_add(1));
    assert_eq!(second.timestamp, first.timestamp.wrapping_add(90_000 / 20));

    let teardown = client
        .request("TEARDOWN", &format!("Session: {session}\r\n"))
        .expect("TEARDOWN response");
    assert_eq!(status_line(&teardown), "RTSP/1.0 200 OK");
    assert!(client.is_closed(), "server kept the connection open");
    wait_for("slot release", || server.client_count() == 0);

    server.stop();
    assert_eq!(server.outstanding_frames(), 0);
}

#[test]
fn no_media_follows_the_teardown_reply() {
    let (mut server, _source) = start_server(test_config());
    let mut client = Client::connect(&server);
    let session = client.play();
    for _ in 0..3 {
        client.read_packet().expect("media frame");
    }

    let teardown = client
        .request("TEARDOWN", &format!("Session: {session}\r\n"))
        .expect("TEARDOWN response");
    assert_eq!(status_line(&teardown), "RTSP/1.0 200 OK");

    let mut rest = Vec::new();
    match client.reader.read_to_end(&mut rest) {
        Ok(_) => assert!(rest.is_empty(), "{} bytes after TEARDOWN reply", rest.len()),
        Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
    }

    server.stop();
}

#[test]
fn get_parameter_body_is_skipped() {
    let (mut server, _source) = start_server(test_config());
    let mut client = Client::connect(&server);

    let body = "packets_received\r\njitter\r\n";
    client.cseq += 1;
    let head = format!(
        "GET_PARAMETER {} RTSP/1.0\r\nCSeq: {}\r\nContent-Type: text/parameters\r\nContent-Length: {}\r\n\r\n",
        client.uri,
        client.cseq,
        body.len()
    );
    client.send_raw(&head).unwrap();
    client.send_raw(&body[..10]).unwrap();
    // longer than the server's read timeout
    thread::sleep(Duration::from_millis(300));
    client.send_raw(&body[10..]).unwrap();

    let response = client.read_response().unwrap();
    assert_eq!(status_line(&response), "RTSP/1.0 200 OK");
    assert_eq!(header(&response, "CSeq"), Some("1"));

    let options = client.request("OPTIONS", "").unwrap();
    assert_eq!(status_line(&options), "RTSP/1.0 200 OK");
    assert_eq!(header(&options, "CSeq"), Some("2"));

    let mut oversized = Client::connect(&server);
    oversized
        .send_raw("GET_PARAMETER * RTSP/1.0\r\nCSeq: 1\r\nContent-Length: 1000000\r\n\r\n")
        .unwrap();
    let response = oversized.read_response().unwrap();
    assert!(response.starts_with("RTSP/1.0 400"), "got {}", status_line(&response));
    assert!(oversized.is_closed());

    server.stop();
}

#[test]
fn play_before_setup_is_rejected() {
    let (mut server, _source) = start_server(test_config());
    let mut client = Client::connect(&server);

    let play = client.request("PLAY", "").expect("PLAY response");
    assert!(play.starts_with("RTSP/1.0 455"), "got {}", status_line(&play));
    assert_eq!(header(&play, "CSeq"), Some("1"));

    // The connection stays usable.
    let options = client.request("OPTIONS", "").expect("OPTIONS response");
    assert_eq!(status_line(&options), "RTSP/1.0 200 OK");
    assert_eq!(header(&options, "CSeq"), Some("2"));
    assert_eq!(server.playing_count(), 0);

    server.stop();
}

#[test]
fn three_clients_and_one_disappears_mid_stream() {
    let (mut server, _source) = start_server(test_config());

    // A: the full sequence.
    let mut a = Client::connect(&server);
    assert!(a.request("OPTIONS", "").unwrap().starts_with("RTSP/1.0 200"));
    assert!(a.request("DESCRIBE", "").unwrap().starts_with("RTSP/1.0 200"));
    a.play();

    // B: straight to SETUP.
    let mut b = Client::connect(&server);
    b.play();

    // C: plays, then vanishes.
    let mut c = Client::connect(&server);
    c.play();
    c.read_packet().expect("C receives media");
    wait_for("three playing sessions", || server.playing_count() == 3);

    c.writer.shutdown(Shutdown::Both).unwrap();
    drop(c);

    wait_for("C to be dropped", || {
        server.playing_count() == 2 && server.client_count() == 2
    });

    for client in [&mut a, &mut b] {
        for _ in 0..5 {
            let packet = client.read_packet().expect("media keeps flowing");
            assert_eq!(packet.payload.len(), FRAME_BYTES);
        }
    }

    server.stop();
    assert_eq!(server.outstanding_frames(), 0);
}

#[test]
fn fourth_client_is_refused_until_a_slot_frees() {
    let (mut server, _source) = start_server(test_config());

    let mut clients: Vec<Client> = (0..3).map(|_| Client::connect(&server)).collect();
    for client in &mut clients {
        let options = client.request("OPTIONS", "").unwrap();
        assert_eq!(status_line(&options), "RTSP/1.0 200 OK");
    }
    assert_eq!(server.client_count(), 3);

    let mut fourth = Client::connect(&server);
    let refused = fourth.request("OPTIONS", "");
    assert!(
        refused.map(|r| r.is_empty()).unwrap_or(true),
        "fourth client was served"
    );
    assert_eq!(server.client_count(), 3);

    drop(clients.pop());
    wait_for("slot release", || server.client_count() == 2);

    let mut fifth = Client::connect(&server);
    let options = fifth.request("OPTIONS", "").unwrap();
    assert_eq!(status_line(&options), "RTSP/1.0 200 OK");
    assert_eq!(server.client_count(), 3);

    server.stop();
}

#[test]
fn malformed_requests_close_the_connection() {
    let (mut server, _source) = start_server(test_config());

    let mut unknown = Client::connect(&server);
    let response = unknown.request("RECORD", "").unwrap();
    assert!(response.starts_with("RTSP/1.0 501"), "got {}", status_line(&response));
    assert!(unknown.is_closed());

    let mut no_cseq = Client::connect(&server);
    no_cseq
        .send_raw("OPTIONS rtsp://127.0.0.1/stream RTSP/1.0\r\n\r\n")
        .unwrap();
    let response = no_cseq.read_response().unwrap();
    assert!(response.starts_with("RTSP/1.0 400"), "got {}", status_line(&response));
    assert!(no_cseq.is_closed());

    let mut garbage = Client::connect(&server);
    garbage.send_raw("hello\r\n\r\n").unwrap();
    let response = garbage.read_response().unwrap();
    assert!(response.starts_with("RTSP/1.0 400"), "got {}", status_line(&response));
    assert!(garbage.is_closed());

    wait_for("slots to free", || server.client_count() == 0);
    server.stop();
}

#[test]
fn client_rtcp_is_ignored() {
    let (mut server, _source) = start_server(test_config());
    let mut client = Client::connect(&server);
    client.play();

    // A receiver report on channel 1, then an ordinary keepalive.
    let mut rtcp = vec![b'$', 1, 0, 8];
    rtcp.extend_from_slice(&[0x80, 201, 0, 1, 0, 0, 0, 1]);
    client.writer.write_all(&rtcp).unwrap();

    let keepalive = client.request("GET_PARAMETER", "").unwrap();
    assert_eq!(status_line(&keepalive), "RTSP/1.0 200 OK");
    client.read_packet().expect("media continues");

    server.stop();
}

#[test]
fn fpv_frames_arrive_over_udp() {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let config = StreamConfig {
        frame_width: 160,
        frame_height: 120,
        fpv_dest: Some(receiver.local_addr().unwrap()),
        fpv_broadcast: false,
        ..test_config()
    };
    let (mut server, _source) = start_server(config);

    let frame_len: usize = 160 * 120 * 2;
    let expected_packets = frame_len.div_ceil(1024 - 8);
    let mut frames: HashMap<u16, Vec<(u16, Vec<u8>)>> = HashMap::new();
    let mut buf = [0u8; 2048];

    let complete = loop {
        let n = receiver.recv(&mut buf).expect("FPV datagram");
        assert!(n <= 1024);
        let (header, payload) = FragmentHeader::decode(&buf[..n]).expect("FPV header");
        assert_eq!(header.total_packets as usize, expected_packets);

        let parts = frames.entry(header.frame_id).or_default();
        parts.push((header.packet_id, payload.to_vec()));
        if parts.len() == expected_packets {
            break frames.remove(&header.frame_id).unwrap();
        }
    };

    let mut parts = complete;
    parts.sort_by_key(|(id, _)| *id);
    let data: Vec<u8> = parts.into_iter().flat_map(|(_, p)| p).collect();
    assert_eq!(data.len(), frame_len);

    wait_for("fpv stats", || server.stats().fpv.frames > 0);
    server.stop();
    assert_eq!(server.outstanding_frames(), 0);
}

#[test]
fn stop_returns_every_buffer() {
    let (mut server, source) = start_server(test_config());
    let mut client = Client::connect(&server);
    client.play();
    client.read_packet().unwrap();

    server.stop();
    assert!(!server.is_running());
    assert_eq!(server.client_count(), 0);
    assert_eq!(server.outstanding_frames(), 0);
    assert_eq!(source.available(), 4);
    assert!(server.stats().capture.frames > 0);
}
