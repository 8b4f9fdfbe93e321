//! Presence stabilizer.
//!
//! Turns the noisy per-frame box count into a debounced boolean. Warm-up
//! frames are ignored outright; after that, `hit_threshold` consecutive
//! positive frames flip `Absent -> Present` and `miss_threshold`
//! consecutive empty frames flip it back.
//!
//! The stabilizer must be fed from the capture loop only, in frame order.

use serde::Serialize;

use crate::config::PresenceSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Presence {
    Absent,
    Present,
}

impl Presence {
    pub fn is_present(&self) -> bool {
        matches!(self, Presence::Present)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Absent => "absent",
            Presence::Present => "present",
        }
    }
}

/// Result of feeding one frame's count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub state: Presence,
    /// Set only on the frame where the state flipped.
    pub transition: Option<(Presence, Presence)>,
    pub in_warmup: bool,
}

#[derive(Clone, Debug)]
pub struct PresenceStabilizer {
    settings: PresenceSettings,
    state: Presence,
    hits: u32,
    misses: u32,
    frames_seen: u64,
}

impl PresenceStabilizer {
    pub fn new(settings: PresenceSettings) -> Self {
        Self {
            settings,
            state: Presence::Absent,
            hits: 0,
            misses: 0,
            frames_seen: 0,
        }
    }

    pub fn state(&self) -> Presence {
        self.state
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    /// Apply one analysed frame's raw count.
    pub fn update(&mut self, count: usize) -> PresenceUpdate {
        let before = self.state;
        self.frames_seen = self.frames_seen.saturating_add(1);
        let in_warmup = self.frames_seen <= self.settings.warmup_frames;

        if in_warmup {
            self.state = Presence::Absent;
            self.hits = 0;
            self.misses = 0;
        } else if count > 0 {
            self.hits = self.hits.saturating_add(1);
            self.misses = 0;
            if self.state == Presence::Absent && self.hits >= self.settings.hit_threshold {
                self.state = Presence::Present;
            }
        } else {
            self.misses = self.misses.saturating_add(1);
            self.hits = 0;
            if self.state == Presence::Present && self.misses >= self.settings.miss_threshold {
                self.state = Presence::Absent;
            }
        }

        PresenceUpdate {
            state: self.state,
            transition: (before != self.state).then_some((before, self.state)),
            in_warmup,
        }
    }
}
