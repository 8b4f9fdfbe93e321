use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use image::RgbImage;

use boxwatch::{BoxDetector, DetectionResult, Frame, InferenceDecoupler, Offer};

struct Slow {
    delay: Duration,
}

impl BoxDetector for Slow {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        thread::sleep(self.delay);
        Ok(DetectionResult::new(Vec::new(), frame.seq, self.delay))
    }
}

struct Panics;

impl BoxDetector for Panics {
    fn name(&self) -> &'static str {
        "panics"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult> {
        panic!("index out of range in decode");
    }
}

fn frame(seq: u64) -> Frame {
    Frame::new(RgbImage::new(8, 8), seq)
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn producer_never_waits_for_slow_inference() {
    let mut decoupler = InferenceDecoupler::spawn(
        Box::new(Slow {
            delay: Duration::from_millis(150),
        }),
        0,
    )
    .expect("spawn");

    let mut worst = Duration::ZERO;
    let start = Instant::now();
    for seq in 1..=60 {
        let t = Instant::now();
        decoupler.offer(&frame(seq));
        worst = worst.max(t.elapsed());
        thread::sleep(Duration::from_millis(2));
    }
    let total = start.elapsed();

    assert!(worst < Duration::from_millis(50), "slowest offer took {:?}", worst);
    assert!(total < Duration::from_millis(150 * 10), "offer loop took {:?}", total);

    let stats = decoupler.stats();
    assert_eq!(stats.offered, 60);
    assert_eq!(stats.skipped, 0);
    assert!(stats.dropped > 0);
    assert_eq!(stats.submitted + stats.dropped, 60);
    decoupler.stop();
}

#[test]
fn latest_result_tracks_newest_completed_pass() {
    let mut decoupler = InferenceDecoupler::spawn(
        Box::new(Slow {
            delay: Duration::from_millis(20),
        }),
        0,
    )
    .expect("spawn");

    assert_eq!(decoupler.latest().count(), 0);
    assert_eq!(decoupler.offer(&frame(1)), Offer::Submitted);
    assert!(wait_until(Duration::from_secs(5), || decoupler.generation() >= 1));
    assert_eq!(decoupler.latest().frame_seq, 1);

    assert!(wait_until(Duration::from_secs(5), || {
        decoupler.offer(&frame(2)) == Offer::Submitted
    }));
    assert!(wait_until(Duration::from_secs(5), || decoupler.latest().frame_seq == 2));
    decoupler.stop();
}

#[test]
fn panicking_pass_publishes_empty_result_and_worker_survives() {
    let mut decoupler = InferenceDecoupler::spawn(Box::new(Panics), 0).expect("spawn");
    assert_eq!(decoupler.offer(&frame(4)), Offer::Submitted);
    assert!(wait_until(Duration::from_secs(5), || decoupler.generation() >= 1));
    assert_eq!(decoupler.latest().count(), 0);

    assert!(wait_until(Duration::from_secs(5), || {
        decoupler.offer(&frame(5)) == Offer::Submitted
    }));
    assert!(wait_until(Duration::from_secs(5), || decoupler.generation() >= 2));
    assert_eq!(decoupler.latest().frame_seq, 5);
    decoupler.stop();
}
