//! Frame plumbing between the camera encoder and the HTTP viewers.
//!
//! ## Pipeline
//!
//! ```text
//! encoder bytes ──► FrameAssembler::write ──► FrameBroadcaster::publish
//!                                                   │
//!                      ┌────────────────────────────┼───────────────┐
//!                      ▼                            ▼               ▼
//!                 await_next()                 await_next()    await_next()
//!                 (viewer 1)                   (viewer 2)      (viewer N)
//! ```
//!
//! The encoder produces Motion JPEG: a plain concatenation of complete JPEG
//! images, each starting with the start-of-image marker `FF D8`. There is no
//! container and no inter-frame state, so a frame boundary is just the next
//! marker.
//!
//! Only the newest frame is kept. A viewer that is busy writing the previous
//! frame to a slow socket simply misses the frames published in between.
//!
//! | Module | Role |
//! |--------|------|
//! | [`jpeg`] | marker constants and stream splitting |
//! | [`assembler`] | rebuilds frames from encoder writes |
//! | [`broadcast`] | latest-frame monitor with "wait for next" semantics |

pub mod assembler;
pub mod broadcast;
pub mod jpeg;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

pub use assembler::FrameAssembler;
pub use broadcast::FrameBroadcaster;

/// One complete JPEG image.
///
/// Immutable and cheap to clone: every viewer that receives the same
/// publication shares one allocation.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Arc<[u8]>);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether two handles point at the same publication (not merely equal bytes).
    pub fn ptr_eq(a: &Frame, b: &Frame) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Frame {
    fn from(data: &[u8]) -> Self {
        Frame(Arc::from(data))
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Frame(Arc::from(data))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame").field("len", &self.0.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_allocation() {
        let a = Frame::from(vec![0xFF, 0xD8, 0x01]);
        let b = a.clone();
        assert!(Frame::ptr_eq(&a, &b));
        assert_eq!(b.as_bytes(), &[0xFF, 0xD8, 0x01]);
    }

    #[test]
    fn equal_bytes_are_distinct_publications() {
        let a = Frame::from(&[1u8, 2, 3][..]);
        let b = Frame::from(&[1u8, 2, 3][..]);
        assert_eq!(a, b);
        assert!(!Frame::ptr_eq(&a, &b));
    }

    #[test]
    fn debug_shows_length_only() {
        let frame = Frame::from(vec![0u8; 4096]);
        assert_eq!(format!("{:?}", frame), "Frame { len: 4096 }");
    }
}
