//! Inference decoupler.
//!
//! Moves the expensive detector onto a worker thread. The capture loop
//! offers frames through a capacity-1 channel with `try_send`: a full slot
//! means the new frame is dropped, never queued, and the producer never
//! blocks. The worker always analyses the newest frame it can see and
//! publishes into a latest-result slot that readers clone out of.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TrySendError};
use log::{debug, info, warn};

use crate::detect::{detect_isolated, BoxDetector, DetectionResult};
use crate::error::WarnThrottle;
use crate::frame::Frame;

/// Worker idle wait when nothing has been handed off.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// What happened to an offered frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    /// Not this frame's turn under the frame-skip factor.
    Skipped,
    /// The slot was still occupied; the frame was discarded.
    Dropped,
    Submitted,
}

/// Most recently completed detection result.
///
/// Writers swap a whole `Arc`, so readers never see a partial result.
pub struct LatestResult {
    slot: RwLock<Arc<DetectionResult>>,
    generation: AtomicU64,
}

impl LatestResult {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Arc::new(DetectionResult::default())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> Arc<DetectionResult> {
        match self.slot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Number of results published so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn publish(&self, result: DetectionResult) {
        let result = Arc::new(result);
        match self.slot.write() {
            Ok(mut guard) => *guard = result,
            Err(poisoned) => *poisoned.into_inner() = result,
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for LatestResult {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecouplerStats {
    pub offered: u64,
    pub submitted: u64,
    pub dropped: u64,
    pub skipped: u64,
}

pub struct InferenceDecoupler {
    tx: Option<Sender<Frame>>,
    latest: Arc<LatestResult>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    frame_skip: u32,
    stats: DecouplerStats,
}

impl InferenceDecoupler {
    /// Start the worker thread. `frame_skip = N` offers every `(N+1)`-th frame.
    pub fn spawn(mut detector: Box<dyn BoxDetector>, frame_skip: u32) -> Result<Self> {
        let (tx, rx) = bounded::<Frame>(1);
        let latest = Arc::new(LatestResult::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_latest = Arc::clone(&latest);
        let worker_shutdown = Arc::clone(&shutdown);
        let worker = thread::Builder::new()
            .name("boxwatch-infer".to_string())
            .spawn(move || {
                let name = detector.name();
                if let Err(err) = detector.warm_up() {
                    warn!("{} warm-up failed: {:#}", name, err);
                }
                let mut throttle = WarnThrottle::default();
                while !worker_shutdown.load(Ordering::SeqCst) {
                    let mut frame = match rx.recv_timeout(IDLE_WAIT) {
                        Ok(frame) => frame,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };
                    while let Ok(newer) = rx.try_recv() {
                        frame = newer;
                    }
                    let result = match detect_isolated(detector.as_mut(), &frame) {
                        Ok(result) => {
                            throttle.reset();
                            result
                        }
                        Err(err) => {
                            if throttle.hit() {
                                warn!(
                                    "inference on frame {} failed ({} in a row): {}",
                                    frame.seq,
                                    throttle.streak(),
                                    err
                                );
                            }
                            DetectionResult::empty(frame.seq)
                        }
                    };
                    debug!(
                        "inference frame={} boxes={} took={:?}",
                        result.frame_seq,
                        result.count(),
                        result.elapsed
                    );
                    worker_latest.publish(result);
                }
                debug!("inference worker exiting");
            })
            .context("failed to spawn inference worker")?;

        info!("inference worker started (frame_skip={})", frame_skip);
        Ok(Self {
            tx: Some(tx),
            latest,
            shutdown,
            worker: Some(worker),
            frame_skip,
            stats: DecouplerStats::default(),
        })
    }

    /// Hand a frame to the worker without blocking.
    pub fn offer(&mut self, frame: &Frame) -> Offer {
        let turn = self.stats.offered % (self.frame_skip as u64 + 1) == 0;
        self.stats.offered += 1;
        if !turn {
            self.stats.skipped += 1;
            return Offer::Skipped;
        }
        let Some(tx) = self.tx.as_ref() else {
            self.stats.dropped += 1;
            return Offer::Dropped;
        };
        match tx.try_send(frame.clone()) {
            Ok(()) => {
                self.stats.submitted += 1;
                Offer::Submitted
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.dropped += 1;
                Offer::Dropped
            }
        }
    }

    pub fn latest(&self) -> Arc<DetectionResult> {
        self.latest.get()
    }

    pub fn latest_handle(&self) -> Arc<LatestResult> {
        Arc::clone(&self.latest)
    }

    pub fn generation(&self) -> u64 {
        self.latest.generation()
    }

    pub fn stats(&self) -> DecouplerStats {
        self.stats
    }

    /// Stop feeding the worker and wait for the current pass to finish.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("inference worker panicked during shutdown");
            }
        }
    }
}

impl Drop for InferenceDecoupler {
    fn drop(&mut self) {
        self.stop();
    }
}
