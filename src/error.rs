use thiserror::Error;

/// Per-frame failure. Never fatal; the capture loop logs it and moves on.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame unavailable or corrupt; the cycle is skipped.
    #[error("capture failed: {0}")]
    Capture(String),
    /// The detection pass failed or panicked; the frame counts as zero boxes.
    #[error("detection pass failed: {0}")]
    Detection(String),
    /// The annotated frame could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),
}

impl FrameError {
    pub fn kind(&self) -> &'static str {
        match self {
            FrameError::Capture(_) => "capture",
            FrameError::Detection(_) => "detection",
            FrameError::Encode(_) => "encode",
        }
    }
}

/// Rate limit for repeated per-frame warnings: the first occurrence of a
/// streak and every `every`-th after it are logged.
#[derive(Clone, Debug)]
pub struct WarnThrottle {
    every: u64,
    consecutive: u64,
}

impl WarnThrottle {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            consecutive: 0,
        }
    }

    /// Record one failure; true when it should be logged.
    pub fn hit(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive == 1 || self.consecutive % self.every == 0
    }

    /// Streak length so far.
    pub fn streak(&self) -> u64 {
        self.consecutive
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

impl Default for WarnThrottle {
    fn default() -> Self {
        Self::new(30)
    }
}
