use boxwatch::config::PresenceSettings;
use boxwatch::{Presence, PresenceStabilizer};

fn stabilizer(hit: u32, miss: u32, warmup: u64) -> PresenceStabilizer {
    PresenceStabilizer::new(PresenceSettings {
        hit_threshold: hit,
        miss_threshold: miss,
        warmup_frames: warmup,
    })
}

#[test]
fn documented_scenario_produces_expected_sequence() {
    let counts = [0, 0, 0, 0, 0, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0];
    let mut s = stabilizer(3, 6, 5);
    let states: Vec<Presence> = counts.iter().map(|&c| s.update(c).state).collect();

    use Presence::{Absent as A, Present as P};
    assert_eq!(
        states,
        vec![A, A, A, A, A, A, A, P, P, P, P, P, P, A, A]
    );
}

#[test]
fn transitions_fire_exactly_once_each() {
    let counts = [0, 0, 0, 0, 0, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0];
    let mut s = stabilizer(3, 6, 5);
    let transitions: Vec<(usize, (Presence, Presence))> = counts
        .iter()
        .enumerate()
        .filter_map(|(i, &c)| s.update(c).transition.map(|t| (i, t)))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (7, (Presence::Absent, Presence::Present)),
            (13, (Presence::Present, Presence::Absent)),
        ]
    );
}

#[test]
fn warmup_ignores_positive_counts() {
    let mut s = stabilizer(1, 1, 4);
    for _ in 0..4 {
        let update = s.update(5);
        assert!(update.in_warmup);
        assert_eq!(update.state, Presence::Absent);
    }
    assert_eq!(s.update(5).state, Presence::Present);
}

#[test]
fn single_gap_does_not_flip_present() {
    let mut s = stabilizer(2, 3, 0);
    s.update(1);
    assert_eq!(s.update(1).state, Presence::Present);
    assert_eq!(s.update(0).state, Presence::Present);
    assert_eq!(s.update(1).state, Presence::Present);
    assert_eq!(s.update(0).state, Presence::Present);
    assert_eq!(s.update(0).state, Presence::Present);
    assert_eq!(s.update(0).state, Presence::Absent);
}

#[test]
fn interrupted_hits_restart_the_count() {
    let mut s = stabilizer(3, 2, 0);
    s.update(1);
    s.update(1);
    s.update(0);
    s.update(1);
    assert_eq!(s.update(1).state, Presence::Absent);
    assert_eq!(s.update(1).state, Presence::Present);
}
