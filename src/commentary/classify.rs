//! Event classification for commentary lines.
//!
//! Pure function of the transcript text and the change between the two
//! most recent race snapshots. No engine calls.

use crate::pipeline::types::{ContextSnapshot, EventCategory};

/// Positions compared when looking for an order change.
const TRACKED_POSITIONS: usize = 10;

/// Laps remaining at or below which every line is at least tension.
const CLOSING_LAPS: u32 = 3;

const HYPE_WORDS: &[&str] = &[
    "overtake",
    "overtakes",
    "overtaken",
    "overtaking",
    "crash",
    "crashes",
    "crashed",
    "collision",
    "collide",
    "contact",
    "spins",
    "spun",
    "wins",
    "winner",
    "victory",
    "incredible",
    "unbelievable",
    "sensational",
];

const HYPE_PHRASES: &[&str] = &["takes the lead", "into the lead", "round the outside", "goes around"];

const TENSION_WORDS: &[&str] = &[
    "drs",
    "gap",
    "battle",
    "battling",
    "closing",
    "pressure",
    "defending",
    "defends",
    "attacking",
    "chasing",
    "tenths",
];

const TENSION_PHRASES: &[&str] = &[
    "final lap",
    "last lap",
    "laps to go",
    "side by side",
    "wheel to wheel",
    "within a second",
];

const INFO_WORDS: &[&str] = &[
    "pit",
    "pits",
    "pitted",
    "pitstop",
    "tyre",
    "tyres",
    "tire",
    "tires",
    "compound",
    "softs",
    "mediums",
    "hards",
    "penalty",
    "strategy",
    "undercut",
    "overcut",
    "weather",
    "rain",
    "flag",
    "vsc",
    "grid",
];

const INFO_PHRASES: &[&str] = &["safety car", "pit stop", "time penalty"];

/// Classifies one English line.
///
/// Priority: context change or hype wording, then tension wording or the
/// closing laps, then info wording, otherwise filler.
pub fn classify(
    text: &str,
    previous: Option<&ContextSnapshot>,
    current: Option<&ContextSnapshot>,
) -> EventCategory {
    let words = normalize(text);

    if order_changed(previous, current) || mentions(&words, HYPE_WORDS, HYPE_PHRASES) {
        return EventCategory::Hype;
    }

    let closing = current
        .and_then(|snapshot| snapshot.laps_remaining())
        .is_some_and(|left| left <= CLOSING_LAPS);
    if closing || mentions(&words, TENSION_WORDS, TENSION_PHRASES) {
        return EventCategory::Tension;
    }

    if mentions(&words, INFO_WORDS, INFO_PHRASES) {
        return EventCategory::Info;
    }

    EventCategory::Filler
}

/// True when the leader changed or any two drivers swapped places in the top ten.
pub fn order_changed(previous: Option<&ContextSnapshot>, current: Option<&ContextSnapshot>) -> bool {
    let (Some(previous), Some(current)) = (previous, current) else {
        return false;
    };
    if previous.positions.is_empty() || current.positions.is_empty() {
        return false;
    }

    let leader = |s: &ContextSnapshot| s.leader().map(|p| p.name.clone());
    if leader(previous) != leader(current) {
        return true;
    }

    let top = |s: &ContextSnapshot| {
        s.positions
            .iter()
            .take(TRACKED_POSITIONS)
            .map(|p| p.name.clone())
            .collect::<Vec<_>>()
    };
    let before = top(previous);
    let after = top(current);

    // A driver present in both top tens at a different index means a swap.
    after.iter().enumerate().any(|(idx, name)| {
        before
            .iter()
            .position(|other| other == name)
            .is_some_and(|old_idx| old_idx != idx)
    })
}

/// Lowercased words joined by single spaces, padded so phrase matches respect word boundaries.
fn normalize(text: &str) -> String {
    let words = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>();
    format!(" {} ", words.join(" "))
}

fn mentions(normalized: &str, words: &[&str], phrases: &[&str]) -> bool {
    words
        .iter()
        .chain(phrases)
        .any(|needle| normalized.contains(&format!(" {} ", needle)))
}
