use std::time::Duration;

use crate::geometry::Candidate;

/// Output of one pipeline pass over one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    /// Accepted regions in original-frame pixels.
    pub candidates: Vec<Candidate>,
    /// Sequence number of the frame this pass analysed.
    pub frame_seq: u64,
    /// Wall time spent in the pass.
    pub elapsed: Duration,
}

impl DetectionResult {
    pub fn new(candidates: Vec<Candidate>, frame_seq: u64, elapsed: Duration) -> Self {
        Self {
            candidates,
            frame_seq,
            elapsed,
        }
    }

    /// Zero-box result, used when a pass fails.
    pub fn empty(frame_seq: u64) -> Self {
        Self {
            frame_seq,
            ..Self::default()
        }
    }

    /// Raw per-frame box count.
    pub fn count(&self) -> usize {
        self.candidates.len()
    }
}
