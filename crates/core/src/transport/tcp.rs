use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::capture::CaptureManager;
use crate::error::{ParseErrorKind, RobocamError};
use crate::protocol::{HttpRequest, HttpResponse, MultipartWriter, Route, Router};
use crate::server::ServerConfig;
use crate::session::{SessionEnd, StreamSession, ViewerRegistry};

/// Read timeout while waiting for the request head. The head itself is
/// capped at [`MAX_HEAD_BYTES`](crate::protocol::request::MAX_HEAD_BYTES).
const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state every connection thread needs.
#[derive(Clone)]
pub struct ConnectionContext {
    pub config: Arc<ServerConfig>,
    pub capture: Arc<CaptureManager>,
    pub viewers: ViewerRegistry,
    pub running: Arc<AtomicBool>,
}

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub fn accept_loop(listener: TcpListener, ctx: ConnectionContext) {
    let running = ctx.running.clone();
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let ctx = ctx.clone();
                let spawned = thread::Builder::new()
                    .name("http-conn".into())
                    .spawn(move || Connection::handle(stream, ctx));
                if let Err(e) = spawned {
                    tracing::warn!(error = %e, "failed to spawn connection thread");
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
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

/// A single HTTP client connection: one request, one response.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    router: Router,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Entry point: read the request, answer it, close.
    pub fn handle(stream: TcpStream, ctx: ConnectionContext) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        tracing::debug!(%peer_addr, "client connected");

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };
        let _ = reader_stream.set_read_timeout(Some(HEAD_TIMEOUT));

        let mut conn = Connection {
            reader: BufReader::new(reader_stream),
            writer: stream,
            router: Router::new(ctx.config.clone()),
            peer_addr,
        };

        let reason = conn.run(&ctx);

        tracing::debug!(%peer_addr, reason, "client disconnected");
    }

    /// Serve one request. Returns the reason the connection ended.
    fn run(&mut self, ctx: &ConnectionContext) -> &'static str {
        let request = match HttpRequest::read_from(&mut self.reader) {
            Ok(Some(request)) => request,
            Ok(None) => return "connection closed by client",
            Err(RobocamError::Parse { kind }) => {
                tracing::warn!(peer = %self.peer_addr, error = %kind, "parse error");
                let response = match kind {
                    ParseErrorKind::UnsupportedVersion => HttpResponse::version_not_supported(),
                    _ => HttpResponse::bad_request(),
                };
                self.respond(response.with_text(&kind.to_string()));
                return "malformed request";
            }
            Err(_) => return "read error",
        };

        tracing::debug!(
            peer = %self.peer_addr,
            method = %request.method,
            target = %request.target,
            version = %request.version,
            "request"
        );

        match self.router.route(&request) {
            Route::Respond(response) => {
                self.respond(response);
                "response sent"
            }
            Route::Stream => self.stream(ctx, &request),
        }
    }

    fn respond(&mut self, response: HttpResponse) {
        tracing::debug!(peer = %self.peer_addr, status = response.status_code, "response");
        if let Err(e) = self.writer.write_all(response.serialize().as_bytes()) {
            tracing::debug!(peer = %self.peer_addr, error = %e, "failed to write response");
        }
    }

    /// Hand the socket to a stream session for as long as the client stays.
    fn stream(&mut self, ctx: &ConnectionContext, request: &HttpRequest) -> &'static str {
        // Accepted just before shutdown; do not power the camera back up.
        if !ctx.running.load(Ordering::SeqCst) {
            self.respond(HttpResponse::service_unavailable().with_text("Server shutting down"));
            return "server shutting down";
        }

        let guard = match ctx.capture.subscribe() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!(peer = %self.peer_addr, error = %e, "camera unavailable");
                self.respond(HttpResponse::service_unavailable().with_text("Camera unavailable"));
                return "camera unavailable";
            }
        };

        let head = self.router.stream_head();
        tracing::debug!(peer = %self.peer_addr, status = head.status_code, "response");
        if self.writer.write_all(head.serialize().as_bytes()).is_err() {
            return "write error";
        }

        let writer = match self.writer.try_clone() {
            Ok(w) => w,
            Err(_) => return "socket clone failed",
        };

        let viewer = ctx.viewers.register(self.peer_addr);
        let session_id = viewer.id;
        tracing::info!(
            session_id,
            peer = %self.peer_addr,
            user_agent = request.get_header("User-Agent").unwrap_or("-"),
            "added streaming client"
        );

        let session = StreamSession::new(
            session_id,
            self.peer_addr,
            guard,
            ctx.capture.broadcaster().clone(),
            MultipartWriter::new(writer, &ctx.config.boundary),
        );
        let summary = session.run();
        let watched = ctx.viewers.remove(session_id).unwrap_or(viewer).since.elapsed();

        tracing::info!(
            session_id,
            peer = %self.peer_addr,
            frames = summary.frames,
            bytes = summary.bytes,
            watched_secs = watched.as_secs_f64(),
            "stream ended"
        );

        match summary.end {
            SessionEnd::ClientGone => "client went away",
            SessionEnd::SourceLost => "camera stopped",
            SessionEnd::Shutdown => "server shutting down",
        }
    }
}
