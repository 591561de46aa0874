//! Overload selection over scored candidates.
//!
//! The analyzer scores every arity-matching candidate per parameter position
//! (0 exact, 1 relative, -1 reject) and hands the score vectors here. A
//! candidate with any rejected position is invalid. A single valid candidate
//! wins outright; otherwise the valid candidate with the most exact
//! positions wins, first declared breaking ties.

use crate::resolution::BoxingRewrite;

/// Exact-position match.
pub const MATCH_EXACT: i8 = 0;
/// Relative match (widening, down-cast, enum to Int, Nil to class).
pub const MATCH_RELATIVE: i8 = 1;
/// Incompatible position.
pub const MATCH_NONE: i8 = -1;

/// One arity-matching candidate: its per-position scores and the boxing
/// rewrites that produced them.
#[derive(Debug)]
pub struct CandidateMatch {
    pub scores: Vec<i8>,
    /// Per-argument rewrite applied before scoring, installed on the call
    /// only if this candidate wins.
    pub rewrites: Vec<Option<BoxingRewrite>>,
}

impl CandidateMatch {
    pub fn new(arity: usize) -> Self {
        CandidateMatch {
            scores: Vec::with_capacity(arity),
            rewrites: Vec::with_capacity(arity),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.scores.iter().all(|&s| s != MATCH_NONE)
    }

    fn exact_positions(&self) -> usize {
        self.scores.iter().filter(|&&s| s == MATCH_EXACT).count()
    }
}

/// Pick the winning candidate index, or `None` when no candidate is valid.
pub fn select(matches: &[CandidateMatch]) -> Option<usize> {
    let valid: Vec<usize> = matches
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_valid())
        .map(|(i, _)| i)
        .collect();

    match valid.as_slice() {
        [] => None,
        [only] => Some(*only),
        _ => {
            let mut best = valid[0];
            let mut best_score = matches[best].exact_positions();
            for &index in &valid[1..] {
                let score = matches[index].exact_positions();
                if score > best_score {
                    best = index;
                    best_score = score;
                }
            }
            Some(best)
        }
    }
}
