//! JPEG markers and Motion JPEG stream splitting.
//!
//! Every JPEG image begins with the start-of-image (SOI) marker `FF D8`,
//! immediately followed by the next marker segment (`FF E0` APP0, `FF DB`
//! DQT, ...). Inside entropy-coded data a literal `FF` is always stuffed as
//! `FF 00`, so the three-byte sequence `FF D8 FF` reliably marks the start
//! of a new image in a concatenated stream.

/// Start-of-image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End-of-image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// SOI plus the leading byte of the following marker. Used when searching
/// for frame starts inside an arbitrary byte stream.
pub const FRAME_START: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Upper bound on a single buffered image. Anything larger is treated as a
/// corrupt stream and dropped.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Whether `data` begins with the start-of-image marker.
pub fn starts_with_soi(data: &[u8]) -> bool {
    data.starts_with(&SOI)
}

/// Whether `data` is a complete image: SOI first, EOI last.
pub fn is_complete_image(data: &[u8]) -> bool {
    data.len() >= SOI.len() + EOI.len() && starts_with_soi(data) && data.ends_with(&EOI)
}

/// Position of the first [`FRAME_START`] at or after `from`.
pub fn find_frame_start(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(FRAME_START.len())
        .position(|w| w == FRAME_START)
        .map(|pos| pos + from)
}

/// Re-cuts an arbitrarily chunked Motion JPEG byte stream so that every
/// emitted segment is exactly one image starting with SOI.
///
/// Pipes and sockets deliver encoder output in read-sized pieces that do
/// not respect image boundaries. [`FrameAssembler`](super::FrameAssembler)
/// only looks for a marker at the start of each write, so a device reading
/// from such a source runs the bytes through a splitter first.
///
/// A segment is emitted as soon as the *next* frame start is seen. Bytes
/// before the first frame start are discarded.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    pending: Vec<u8>,
    /// Offset up to which `pending` has already been searched.
    scanned: usize,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; `emit` is called once per completed image.
    pub fn push(&mut self, data: &[u8], mut emit: impl FnMut(&[u8])) {
        self.pending.extend_from_slice(data);

        let mut start = 0usize;
        let mut from = self.scanned.max(1);
        while let Some(pos) = find_frame_start(&self.pending, from) {
            let segment = &self.pending[start..pos];
            if starts_with_soi(segment) {
                emit(segment);
            } else {
                tracing::trace!(bytes = segment.len(), "discarding bytes before first frame");
            }
            start = pos;
            from = pos + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > MAX_FRAME_BYTES {
            tracing::warn!(bytes = self.pending.len(), "no frame boundary found, dropping buffered data");
            self.pending.clear();
        }

        // A frame start may straddle this push and the next one.
        self.scanned = self
            .pending
            .len()
            .saturating_sub(FRAME_START.len() - 1);
    }

    /// Emit the trailing image once the stream has ended.
    ///
    /// Nothing follows it to prove it whole, so it is only emitted if it ends
    /// with EOI; an encoder killed mid-frame leaves a truncated tail.
    pub fn finish(&mut self, mut emit: impl FnMut(&[u8])) {
        if is_complete_image(&self.pending) {
            emit(&self.pending);
        } else if !self.pending.is_empty() {
            tracing::debug!(bytes = self.pending.len(), "dropping truncated trailing frame");
        }
        self.pending.clear();
        self.scanned = 0;
    }

    /// Bytes held back waiting for the next frame start.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
