use std::collections::VecDeque;

use crate::types::{GestureKind, RawPrediction, SmoothedGesture};

pub const HISTORY_CAPACITY: usize = 5;
pub const VOTE_WINDOW: usize = 3;
pub const CONFIDENCE_THRESHOLD: f32 = 0.7;

/// How to pick between classes whose mean confidence is exactly equal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TieBreak {
    /// The class seen first when scanning the vote window oldest to newest.
    #[default]
    FirstSeen,
    /// The class of the newest qualifying prediction.
    MostRecent,
    /// The class with the smallest index in the label table.
    LowestIndex,
}

impl std::str::FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-seen" => Ok(TieBreak::FirstSeen),
            "most-recent" => Ok(TieBreak::MostRecent),
            "lowest-index" => Ok(TieBreak::LowestIndex),
            other => Err(format!(
                "unknown tie-break policy {other:?}, expected first-seen, most-recent or lowest-index"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SmootherConfig {
    pub history: usize,
    pub vote_window: usize,
    pub threshold: f32,
    pub tie_break: TieBreak,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            history: HISTORY_CAPACITY,
            vote_window: VOTE_WINDOW,
            threshold: CONFIDENCE_THRESHOLD,
            tie_break: TieBreak::default(),
        }
    }
}

struct VoteGroup {
    class_index: usize,
    sum: f32,
    count: usize,
    first_seen: usize,
    last_seen: usize,
}

impl VoteGroup {
    fn mean(&self) -> f32 {
        self.sum / self.count as f32
    }
}

/// Confidence-weighted vote over the newest raw predictions.
pub struct TemporalSmoother {
    history: VecDeque<RawPrediction>,
    cfg: SmootherConfig,
}

impl TemporalSmoother {
    pub fn new(cfg: SmootherConfig) -> Self {
        let history = cfg.history.max(cfg.vote_window).max(1);
        Self {
            history: VecDeque::with_capacity(history),
            cfg: SmootherConfig { history, ..cfg },
        }
    }

    pub fn update(&mut self, prediction: RawPrediction) -> Option<SmoothedGesture> {
        if self.history.len() == self.cfg.history {
            self.history.pop_front();
        }
        self.history.push_back(prediction);

        if self.history.len() < self.cfg.vote_window {
            return None;
        }

        let window = self
            .history
            .iter()
            .skip(self.history.len() - self.cfg.vote_window);

        // Groups stay in discovery order so ties resolve deterministically.
        let mut groups: Vec<VoteGroup> = Vec::with_capacity(self.cfg.vote_window);
        for (pos, p) in window.enumerate() {
            if p.confidence <= self.cfg.threshold {
                continue;
            }
            match groups.iter_mut().find(|g| g.class_index == p.class_index) {
                Some(group) => {
                    group.sum += p.confidence;
                    group.count += 1;
                    group.last_seen = pos;
                }
                None => groups.push(VoteGroup {
                    class_index: p.class_index,
                    sum: p.confidence,
                    count: 1,
                    first_seen: pos,
                    last_seen: pos,
                }),
            }
        }

        let mut winner: Option<&VoteGroup> = None;
        for group in &groups {
            winner = match winner {
                None => Some(group),
                Some(best) if group.mean() > best.mean() => Some(group),
                Some(best) if group.mean() == best.mean() && self.wins_tie(group, best) => {
                    Some(group)
                }
                keep => keep,
            };
        }

        let winner = winner?;
        let Some(kind) = GestureKind::from_index(winner.class_index) else {
            log::warn!(
                "classifier produced out-of-range class index {}",
                winner.class_index
            );
            return None;
        };

        Some(SmoothedGesture {
            kind,
            confidence: winner.mean(),
        })
    }

    fn wins_tie(&self, challenger: &VoteGroup, incumbent: &VoteGroup) -> bool {
        match self.cfg.tie_break {
            TieBreak::FirstSeen => challenger.first_seen < incumbent.first_seen,
            TieBreak::MostRecent => challenger.last_seen > incumbent.last_seen,
            TieBreak::LowestIndex => challenger.class_index < incumbent.class_index,
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

impl Default for TemporalSmoother {
    fn default() -> Self {
        Self::new(SmootherConfig::default())
    }
}
