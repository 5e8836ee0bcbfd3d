//! 离线事件的概率表

use rand::Rng;
use rand::seq::SliceRandom;

use crate::models::{EventIntent, EventOutcome};

/// 意图分布的倾向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentBias {
    Conflict,
    Support,
    Uniform,
}

const CONFLICT_BIASED: [(EventIntent, u32); 5] = [
    (EventIntent::Conflict, 50),
    (EventIntent::Gossip, 20),
    (EventIntent::Collaboration, 15),
    (EventIntent::Leisure, 10),
    (EventIntent::Support, 5),
];

const SUPPORT_BIASED: [(EventIntent, u32); 5] = [
    (EventIntent::Support, 40),
    (EventIntent::Collaboration, 25),
    (EventIntent::Leisure, 20),
    (EventIntent::Gossip, 10),
    (EventIntent::Conflict, 5),
];

const UNIFORM: [(EventIntent, u32); 5] = [
    (EventIntent::Conflict, 1),
    (EventIntent::Support, 1),
    (EventIntent::Collaboration, 1),
    (EventIntent::Gossip, 1),
    (EventIntent::Leisure, 1),
];

pub fn intent_weights(bias: IntentBias) -> &'static [(EventIntent, u32)] {
    match bias {
        IntentBias::Conflict => &CONFLICT_BIASED,
        IntentBias::Support => &SUPPORT_BIASED,
        IntentBias::Uniform => &UNIFORM,
    }
}

/// 每种意图的结果权重
pub fn outcome_weights(intent: EventIntent) -> &'static [(EventOutcome, u32)] {
    match intent {
        EventIntent::Conflict => &[
            (EventOutcome::Escalated, 45),
            (EventOutcome::Reconciled, 35),
            (EventOutcome::Uneventful, 20),
        ],
        EventIntent::Support => &[
            (EventOutcome::Bonded, 55),
            (EventOutcome::Rebuffed, 20),
            (EventOutcome::Uneventful, 25),
        ],
        EventIntent::Collaboration => &[
            (EventOutcome::Succeeded, 55),
            (EventOutcome::Failed, 30),
            (EventOutcome::Uneventful, 15),
        ],
        EventIntent::Gossip => &[
            (EventOutcome::Bonded, 30),
            (EventOutcome::Escalated, 20),
            (EventOutcome::Uneventful, 50),
        ],
        EventIntent::Leisure => &[
            (EventOutcome::Bonded, 40),
            (EventOutcome::Uneventful, 60),
        ],
    }
}

/// 按权重抽取；表为空或权重全为 0 时返回 None
pub fn pick_weighted<T: Copy, R: Rng + ?Sized>(rng: &mut R, table: &[(T, u32)]) -> Option<T> {
    table
        .choose_weighted(rng, |(_, weight)| *weight)
        .ok()
        .map(|(item, _)| *item)
}

pub const LOCATION_NAMES: [&str; 8] = [
    "the rooftop garden",
    "the night market",
    "the old library",
    "the harbour café",
    "the train platform",
    "the rehearsal room",
    "the laundromat",
    "the riverside path",
];

pub const SHADOW_NAMES: [&str; 5] = [
    "a stranger",
    "a neighbour",
    "an old acquaintance",
    "a street musician",
    "a delivery courier",
];

/// 事件摘要
pub fn describe(intent: EventIntent, outcome: EventOutcome, participants: &[String], place: &str) -> String {
    let who = match participants {
        [] => "Someone".to_string(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    };
    let what = match intent {
        EventIntent::Conflict => "argued",
        EventIntent::Support => "looked out for each other",
        EventIntent::Collaboration => "worked on something together",
        EventIntent::Gossip => "traded rumours",
        EventIntent::Leisure => "passed the time",
    };
    let how = match outcome {
        EventOutcome::Escalated => "and it got heated",
        EventOutcome::Reconciled => "but made peace in the end",
        EventOutcome::Bonded => "and grew closer",
        EventOutcome::Rebuffed => "but the gesture was brushed off",
        EventOutcome::Succeeded => "and it went well",
        EventOutcome::Failed => "and it fell apart",
        EventOutcome::Uneventful => "without much happening",
    };
    format!("{} {} at {}, {}.", who, what, place, how)
}
