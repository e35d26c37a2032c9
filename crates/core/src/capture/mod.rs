//! Camera power management.
//!
//! The camera is only powered while someone is watching. Each viewer
//! registers with the [`CaptureManager`]; the first registration starts the
//! device and the last release stops it:
//!
//! ```text
//!            acquire (count 0 → 1)
//!   IDLE ─────────────────────────────► ACTIVE ──┐ acquire / release
//!    ▲                                    │  ◄───┘ (count stays > 0)
//!    └────────────────────────────────────┘
//!            release (count 1 → 0)
//! ```
//!
//! The count and the device handle live under one lock, so a device start
//! and a concurrent release can never interleave. A failed start leaves the
//! manager idle with the count unchanged.
//!
//! A device can also die on its own. It then flags the broadcaster so the
//! sessions waiting on it end and release; the next `acquire` sees the dead
//! device through [`CaptureDevice::is_alive`] and starts a fresh one.

pub mod command;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::media::{FrameAssembler, FrameBroadcaster};

pub use command::{CommandConfig, CommandDevice};

/// A camera (or any other MJPEG source) that can be switched on and off.
///
/// Implementations own whatever thread or process produces the encoded
/// stream and feed every chunk into the [`FrameAssembler`] handed to
/// [`start`](Self::start). Writes must begin at frame boundaries; sources
/// that cannot guarantee that should cut their output with
/// [`FrameSplitter`](crate::media::jpeg::FrameSplitter).
pub trait CaptureDevice: Send {
    /// Power up and begin continuous encoding into `sink`.
    fn start(&mut self, sink: FrameAssembler) -> Result<()>;

    /// Stop encoding and release the hardware.
    fn stop(&mut self) -> Result<()>;

    /// Whether the device is still producing. A device that died on its
    /// own (encoder crash, camera unplugged) reports `false` and is replaced
    /// on the next [`acquire`](CaptureManager::acquire).
    fn is_alive(&self) -> bool {
        true
    }

    /// Short label for logs.
    fn name(&self) -> &str {
        "camera"
    }
}

/// Builds a fresh device each time the manager goes from idle to active.
pub type DeviceFactory = Box<dyn Fn() -> Result<Box<dyn CaptureDevice>> + Send + Sync>;

/// Power state of the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No consumers; device off.
    Idle,
    /// At least one consumer; device running.
    Active,
}

/// Consumer count and the live device, always mutated together.
///
/// `device.is_some()` iff `consumers > 0`.
struct CaptureSlot {
    consumers: usize,
    device: Option<Box<dyn CaptureDevice>>,
}

/// Reference-counted owner of the capture device.
///
/// One instance per process, shared as `Arc<CaptureManager>` with every
/// connection that needs video.
pub struct CaptureManager {
    slot: Mutex<CaptureSlot>,
    factory: DeviceFactory,
    broadcaster: Arc<FrameBroadcaster>,
}

impl CaptureManager {
    pub fn new(broadcaster: Arc<FrameBroadcaster>, factory: DeviceFactory) -> Self {
        Self {
            slot: Mutex::new(CaptureSlot {
                consumers: 0,
                device: None,
            }),
            factory,
            broadcaster,
        }
    }

    /// Register a consumer, starting the device if this is the first one.
    ///
    /// A device that has died since it was started is replaced here, so a
    /// new viewer never attaches to a dead camera. On start failure the
    /// error is returned and the consumer is not counted.
    pub fn acquire(&self) -> Result<()> {
        let mut slot = self.slot.lock();

        match slot.device.as_ref().map(|device| device.is_alive()) {
            None => slot.device = Some(self.start_device()?),
            Some(false) => {
                tracing::warn!(consumers = slot.consumers, "capture device died, restarting");
                // The dead device stays in place if the restart fails, so the
                // slot stays consistent with the remaining consumers.
                let fresh = self.start_device()?;
                if let Some(mut dead) = slot.device.replace(fresh) {
                    if let Err(e) = dead.stop() {
                        tracing::debug!(device = dead.name(), error = %e, "dead device cleanup failed");
                    }
                }
            }
            Some(true) => {}
        }

        slot.consumers += 1;
        tracing::debug!(consumers = slot.consumers, "capture consumer acquired");
        Ok(())
    }

    fn start_device(&self) -> Result<Box<dyn CaptureDevice>> {
        let mut device = (self.factory)()?;
        self.broadcaster.source_restored();
        let sink = FrameAssembler::new(self.broadcaster.clone());
        if let Err(e) = device.start(sink) {
            tracing::error!(device = device.name(), error = %e, "capture start failed");
            // Nothing is producing frames; anyone still attached must not wait.
            self.broadcaster.source_lost();
            return Err(e);
        }
        tracing::info!(device = device.name(), "capture started");
        Ok(device)
    }

    /// Unregister a consumer, stopping the device when none remain.
    ///
    /// Stop errors are logged; the count still reaches zero.
    pub fn release(&self) {
        let mut slot = self.slot.lock();

        if slot.consumers > 0 {
            slot.consumers -= 1;
        }
        tracing::debug!(consumers = slot.consumers, "capture consumer released");

        if slot.consumers == 0 {
            if let Some(mut device) = slot.device.take() {
                match device.stop() {
                    Ok(()) => tracing::info!(device = device.name(), "capture stopped"),
                    Err(e) => {
                        tracing::warn!(device = device.name(), error = %e, "capture stop failed")
                    }
                }
            }
        }
    }

    /// [`acquire`](Self::acquire) and return a guard that releases on drop.
    pub fn subscribe(self: &Arc<Self>) -> Result<CaptureGuard> {
        self.acquire()?;
        Ok(CaptureGuard {
            manager: self.clone(),
        })
    }

    pub fn state(&self) -> CaptureState {
        if self.slot.lock().device.is_some() {
            CaptureState::Active
        } else {
            CaptureState::Idle
        }
    }

    pub fn consumers(&self) -> usize {
        self.slot.lock().consumers
    }

    pub fn broadcaster(&self) -> &Arc<FrameBroadcaster> {
        &self.broadcaster
    }
}

/// Keeps the camera running for as long as it is alive.
#[must_use = "dropping the guard releases the camera immediately"]
pub struct CaptureGuard {
    manager: Arc<CaptureManager>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.manager.release();
    }
}
