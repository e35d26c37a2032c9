pub mod capture;
pub mod error;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use capture::{CaptureDevice, CaptureGuard, CaptureManager, CaptureState, CommandConfig};
pub use error::{Result, RobocamError};
pub use media::{Frame, FrameAssembler, FrameBroadcaster};
pub use server::{Server, ServerConfig};
pub use session::Viewer;
