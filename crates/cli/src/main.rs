use camstream::{PixelFormat, StreamConfig, StreamServer, TestPatternSource};
use clap::Parser;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "camstream-server",
    about = "Stream a test pattern over RTSP (interleaved RTP) and UDP FPV"
)]
struct Args {
    /// RTSP bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: SocketAddr,

    /// Path advertised in the stream URL
    #[arg(long, default_value = camstream::config::DEFAULT_RTSP_PATH)]
    path: String,

    /// Host advertised in the stream URL and SDP
    #[arg(long)]
    public_host: Option<String>,

    /// Maximum concurrent RTSP clients
    #[arg(long, default_value_t = camstream::config::DEFAULT_MAX_CLIENTS)]
    max_clients: usize,

    /// Target frame rate
    #[arg(long, default_value_t = camstream::config::DEFAULT_TARGET_FPS)]
    fps: u32,

    #[arg(long, default_value_t = 320)]
    width: u32,

    #[arg(long, default_value_t = 240)]
    height: u32,

    /// rgb565, rgb888, yuv422 or grayscale
    #[arg(long, default_value = "rgb565")]
    pixel_format: PixelFormat,

    /// FPV destination (host:port); broadcast by default
    #[arg(long, default_value = "255.255.255.255:8888")]
    fpv_dest: SocketAddr,

    /// Disable the UDP FPV path
    #[arg(long)]
    no_fpv: bool,

    /// Maximum FPV datagram size, header included
    #[arg(long, default_value_t = camstream::config::DEFAULT_MAX_UDP_PAYLOAD)]
    max_udp_payload: usize,

    /// Accept requests without a CSeq header
    #[arg(long)]
    lenient_cseq: bool,

    /// Seconds between stats log lines; 0 disables
    #[arg(long, default_value_t = 1)]
    stats_interval: u64,
}

impl Args {
    fn into_config(self) -> StreamConfig {
        let frame_bytes = self
            .pixel_format
            .frame_len(self.width, self.height)
            .unwrap_or_default();
        StreamConfig {
            rtsp_bind: self.bind,
            rtsp_path: self.path,
            public_host: self.public_host,
            max_clients: self.max_clients,
            require_cseq: !self.lenient_cseq,
            target_fps: self.fps,
            frame_width: self.width,
            frame_height: self.height,
            pixel_format: self.pixel_format,
            fpv_broadcast: matches!(self.fpv_dest.ip(), IpAddr::V4(ip) if ip.is_broadcast()),
            fpv_dest: (!self.no_fpv).then_some(self.fpv_dest),
            max_udp_payload: self.max_udp_payload,
            max_fpv_frame_bytes: frame_bytes.max(StreamConfig::default().max_fpv_frame_bytes),
            stats_interval: (self.stats_interval > 0)
                .then(|| Duration::from_secs(self.stats_interval)),
            ..StreamConfig::default()
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = args.into_config();

    let source = match TestPatternSource::new(
        config.frame_width,
        config.frame_height,
        config.pixel_format,
        3,
    ) {
        Ok(source) => source.with_frame_rate(config.target_fps),
        Err(e) => {
            eprintln!("Failed to create test pattern: {}", e);
            return;
        }
    };

    let mut server = match StreamServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return;
        }
    };

    if let Err(e) = server.start(Arc::new(source)) {
        eprintln!("Failed to start server: {}", e);
        return;
    }

    println!(
        "Streaming at {}, press Enter to stop",
        server.stream_url().unwrap_or_default()
    );
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        eprintln!("stdin: {}", e);
    }

    server.stop();
}
