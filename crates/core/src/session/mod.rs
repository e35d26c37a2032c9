//! Live stream sessions.
//!
//! A [`StreamSession`] is the server side of one `GET /stream.mjpg`: it
//! owns a [`CaptureGuard`] (so the camera stays on while it runs), waits for
//! each new frame and writes it as one multipart part.
//!
//! ## Session lifecycle
//!
//! ```text
//! subscribe (camera acquired) -> head sent -> loop { await_next, write_part }
//!   write fails        -> ended (client gone)   -> guard dropped, camera released
//!   camera died        -> ended (source lost)   -> guard dropped, camera released
//!   broadcaster closed -> ended (shutdown)      -> guard dropped, camera released
//! ```
//!
//! A dropped client is only noticed on the next write, so a session may
//! outlive its socket by up to one frame interval.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::capture::CaptureGuard;
use crate::media::FrameBroadcaster;
use crate::protocol::MultipartWriter;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Why a session stopped streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Writing to the client failed; the normal way a viewer leaves.
    ClientGone,
    /// The camera stopped producing frames on its own.
    SourceLost,
    /// The server is shutting down.
    Shutdown,
}

/// Totals reported when a session ends.
#[derive(Debug, Clone, Copy)]
pub struct SessionSummary {
    pub frames: u64,
    pub bytes: u64,
    pub end: SessionEnd,
}

/// One viewer's streaming loop.
pub struct StreamSession<W: Write> {
    id: u64,
    peer: SocketAddr,
    broadcaster: Arc<FrameBroadcaster>,
    writer: MultipartWriter<W>,
    // Released when the session is dropped, on every exit path.
    _guard: CaptureGuard,
}

impl<W: Write> StreamSession<W> {
    pub fn new(
        id: u64,
        peer: SocketAddr,
        guard: CaptureGuard,
        broadcaster: Arc<FrameBroadcaster>,
        writer: MultipartWriter<W>,
    ) -> Self {
        StreamSession {
            id,
            peer,
            broadcaster,
            writer,
            _guard: guard,
        }
    }

    /// Stream frames until the client disconnects or the server stops.
    pub fn run(mut self) -> SessionSummary {
        let mut frames = 0u64;
        let mut bytes = 0u64;

        tracing::debug!(session_id = self.id, peer = %self.peer, "stream session started");

        let end = loop {
            let Some(frame) = self.broadcaster.await_next() else {
                if self.broadcaster.is_closed() {
                    break SessionEnd::Shutdown;
                }
                tracing::warn!(session_id = self.id, peer = %self.peer, "camera stopped, ending stream");
                break SessionEnd::SourceLost;
            };

            match self.writer.write_part(JPEG_CONTENT_TYPE, &frame) {
                Ok(n) => {
                    frames += 1;
                    bytes += n as u64;
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = self.id,
                        peer = %self.peer,
                        error = %e,
                        "removed streaming client"
                    );
                    break SessionEnd::ClientGone;
                }
            }
        };

        tracing::debug!(session_id = self.id, frames, bytes, ?end, "stream session ended");
        SessionSummary { frames, bytes, end }
    }
}

/// A client currently watching the stream.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub id: u64,
    pub peer: SocketAddr,
    pub since: Instant,
}

/// Thread-safe registry of active stream sessions.
///
/// Backed by `parking_lot::RwLock`; only connect/disconnect take the write
/// lock.
#[derive(Clone)]
pub struct ViewerRegistry {
    viewers: Arc<RwLock<HashMap<u64, Viewer>>>,
    next_id: Arc<AtomicU64>,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        ViewerRegistry {
            viewers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Record a new viewer and assign it an id.
    pub fn register(&self, peer: SocketAddr) -> Viewer {
        let viewer = Viewer {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            peer,
            since: Instant::now(),
        };
        let mut viewers = self.viewers.write();
        viewers.insert(viewer.id, viewer.clone());
        tracing::debug!(session_id = viewer.id, %peer, total_viewers = viewers.len(), "viewer registered");
        viewer
    }

    pub fn remove(&self, id: u64) -> Option<Viewer> {
        let mut viewers = self.viewers.write();
        let removed = viewers.remove(&id);
        if removed.is_some() {
            tracing::debug!(session_id = id, total_viewers = viewers.len(), "viewer removed");
        }
        removed
    }

    pub fn list(&self) -> Vec<Viewer> {
        let mut list: Vec<Viewer> = self.viewers.read().values().cloned().collect();
        list.sort_by_key(|v| v.id);
        list
    }

    pub fn len(&self) -> usize {
        self.viewers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewers.read().is_empty()
    }
}

impl Default for ViewerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
