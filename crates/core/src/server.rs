use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::capture::{
    CaptureDevice, CaptureGuard, CaptureManager, CommandConfig, CommandDevice, DeviceFactory,
};
use crate::error::{Result, RobocamError};
use crate::media::FrameBroadcaster;
use crate::protocol::multipart::DEFAULT_BOUNDARY;
use crate::session::{Viewer, ViewerRegistry};
use crate::transport::ConnectionContext;
use crate::transport::tcp;

/// Default listen address; all interfaces, port 8081.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8081";

/// Server-level configuration used by the HTTP handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path serving the live multipart stream.
    pub stream_path: String,
    /// Multipart boundary token (without the leading `--`).
    pub boundary: String,
    /// `<title>` of the viewer page.
    pub page_title: String,
    /// Size of the `<img>` element on the viewer page.
    pub preview_width: u32,
    pub preview_height: u32,
    /// Hold the camera on for the whole server lifetime instead of only
    /// while a client is streaming.
    pub keep_camera_on: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            stream_path: "/stream.mjpg".to_string(),
            boundary: DEFAULT_BOUNDARY.to_string(),
            page_title: "Robot's view".to_string(),
            preview_width: 320,
            preview_height: 240,
            keep_camera_on: false,
        }
    }
}

/// MJPEG-over-HTTP camera server.
///
/// Owns the frame broadcaster, the reference-counted capture manager and the
/// viewer registry. Delegates connection handling to [`transport::tcp`].
///
/// [`transport::tcp`]: crate::transport::tcp
pub struct Server {
    viewers: ViewerRegistry,
    running: Arc<AtomicBool>,
    bind_addr: String,
    local_addr: Option<SocketAddr>,
    broadcaster: Arc<FrameBroadcaster>,
    capture: Arc<CaptureManager>,
    config: Arc<ServerConfig>,
    pinned: Mutex<Option<CaptureGuard>>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(bind_addr: &str, factory: DeviceFactory) -> Self {
        Self::with_config(bind_addr, factory, ServerConfig::default())
    }

    /// Create a server with custom HTTP configuration.
    pub fn with_config(bind_addr: &str, factory: DeviceFactory, config: ServerConfig) -> Self {
        let broadcaster = Arc::new(FrameBroadcaster::new());
        Self {
            viewers: ViewerRegistry::new(),
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            local_addr: None,
            capture: Arc::new(CaptureManager::new(broadcaster.clone(), factory)),
            broadcaster,
            config: Arc::new(config),
            pinned: Mutex::new(None),
            accept_thread: None,
        }
    }

    /// Create a server whose camera is an external encoder process.
    pub fn with_command(bind_addr: &str, command: CommandConfig, config: ServerConfig) -> Self {
        let factory: DeviceFactory = Box::new(move || {
            Ok(Box::new(CommandDevice::new(command.clone())) as Box<dyn CaptureDevice>)
        });
        Self::with_config(bind_addr, factory, config)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RobocamError::AlreadyRunning);
        }

        self.broadcaster.reopen();

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;
        self.local_addr = listener.local_addr().ok();

        if self.config.keep_camera_on {
            *self.pinned.lock() = Some(self.capture.subscribe()?);
            tracing::info!("camera held on for server lifetime");
        }

        self.running.store(true, Ordering::SeqCst);

        let ctx = ConnectionContext {
            config: self.config.clone(),
            capture: self.capture.clone(),
            viewers: self.viewers.clone(),
            running: self.running.clone(),
        };

        tracing::info!(addr = %self.bind_addr, path = %self.config.stream_path, "MJPEG server listening");

        let spawned = thread::Builder::new()
            .name("http-accept".into())
            .spawn(move || tcp::accept_loop(listener, ctx));
        match spawned {
            Ok(handle) => self.accept_thread = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.pinned.lock().take();
                return Err(e.into());
            }
        }

        Ok(())
    }

    /// Stop accepting, end every stream session and release the camera.
    ///
    /// Returns once the accept loop has exited and the listening socket is
    /// closed, so the address can be bound again straight away.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                tracing::warn!("accept thread panicked");
            }
        }
        self.pinned.lock().take();
        self.broadcaster.close();
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address actually bound, once started. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Clients currently receiving the stream.
    pub fn get_viewers(&self) -> Vec<Viewer> {
        self.viewers.list()
    }

    pub fn capture(&self) -> &Arc<CaptureManager> {
        &self.capture
    }

    pub fn broadcaster(&self) -> &Arc<FrameBroadcaster> {
        &self.broadcaster
    }

    /// Returns the server's HTTP configuration.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}
