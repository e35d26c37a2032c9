use std::sync::Arc;

use super::jpeg;
use super::{Frame, FrameBroadcaster};

/// Rebuilds discrete JPEG frames from the encoder's write calls.
///
/// The hardware encoder emits one write per frame start, each beginning with
/// the SOI marker, optionally followed by continuation writes. A write that
/// starts with SOI therefore closes whatever has accumulated so far:
///
/// ```text
/// write(FFD8 AAAA)   buffer = FFD8 AAAA
/// write(BBBB)        buffer = FFD8 AAAA BBBB
/// write(FFD8 CCCC)   publish FFD8 AAAA BBBB, buffer = FFD8 CCCC
/// ```
///
/// The very first marker only opens a frame. Markers in the middle of a
/// write are not searched for; sources that do not align writes to frame
/// starts go through [`jpeg::FrameSplitter`] first.
///
/// Owned by the single capture thread, so no locking is needed here.
pub struct FrameAssembler {
    buffer: Vec<u8>,
    broadcaster: Arc<FrameBroadcaster>,
    frames: u64,
}

impl FrameAssembler {
    pub fn new(broadcaster: Arc<FrameBroadcaster>) -> Self {
        Self {
            buffer: Vec::new(),
            broadcaster,
            frames: 0,
        }
    }

    /// Consume one chunk of encoder output; returns the number of bytes taken.
    pub fn write(&mut self, chunk: &[u8]) -> usize {
        if jpeg::starts_with_soi(chunk) && !self.buffer.is_empty() {
            self.emit();
        }
        self.buffer.extend_from_slice(chunk);
        chunk.len()
    }

    /// Publish the buffered frame without waiting for the next marker.
    ///
    /// Called when the encoder output ends. Data that does not start with
    /// SOI is not a frame and is discarded. Returns whether a frame was
    /// published.
    pub fn flush(&mut self) -> bool {
        if jpeg::starts_with_soi(&self.buffer) {
            self.emit();
            true
        } else {
            self.buffer.clear();
            false
        }
    }

    /// Bytes accumulated towards the frame in progress.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Frames published by this assembler.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// The source died mid-stream. Buffered bytes are dropped and every
    /// viewer waiting for the next frame is released.
    pub fn source_lost(&mut self) {
        self.buffer.clear();
        self.broadcaster.source_lost();
    }

    fn emit(&mut self) {
        let frame = Frame::from(self.buffer.as_slice());
        self.buffer.clear();
        self.frames += 1;
        self.broadcaster.publish(frame);
    }
}
