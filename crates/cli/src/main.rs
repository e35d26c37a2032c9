use clap::Parser;
use robocam::capture::command::{DEFAULT_FRAMERATE, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use robocam::server::DEFAULT_BIND_ADDR;
use robocam::{CommandConfig, Server, ServerConfig};
use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::thread;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "robocam-server",
    about = "Live MJPEG camera stream over HTTP"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = DEFAULT_BIND_ADDR)]
    bind: String,

    /// Capture width in pixels
    #[arg(long, default_value_t = DEFAULT_WIDTH)]
    width: u32,

    /// Capture height in pixels
    #[arg(long, default_value_t = DEFAULT_HEIGHT)]
    height: u32,

    /// Capture frame rate
    #[arg(long, default_value_t = DEFAULT_FRAMERATE)]
    framerate: u32,

    /// Encoder command line writing MJPEG to stdout (overrides the rpicam-vid default)
    #[arg(long)]
    camera_command: Option<String>,

    /// Keep the camera running even when nobody is watching
    #[arg(long)]
    keep_camera_on: bool,
}

/// Address other machines on the LAN can reach us at.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// outbound interface.
fn own_ip() -> IpAddr {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| {
            s.connect("8.8.8.8:80")?;
            s.local_addr()
        })
        .map(|a| a.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let command = match args.camera_command.as_deref() {
        Some(line) => match CommandConfig::from_command_line(line) {
            Some(command) => command,
            None => {
                eprintln!("Empty --camera-command");
                std::process::exit(2);
            }
        },
        None => CommandConfig::rpicam(args.width, args.height, args.framerate),
    };

    let config = ServerConfig {
        preview_width: args.width,
        preview_height: args.height,
        keep_camera_on: args.keep_camera_on,
        ..Default::default()
    };
    let stream_path = config.stream_path.clone();

    let mut server = Server::with_command(&args.bind, command, config);

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        std::process::exit(1);
    }

    let port = server.local_addr().map(|a| a.port()).unwrap_or(8081);
    println!(
        "Open http://{}:{}{} in a browser; press Enter to stop",
        own_ip(),
        port,
        stream_path
    );

    let mut input = String::new();
    match io::stdin().read_line(&mut input) {
        // No terminal (running as a service): serve until killed.
        Ok(0) => loop {
            thread::park();
        },
        _ => server.stop(),
    }
}
