//! Hierarchical Thompson Sampling
//!
//! Two-stage selection: first a topic, then a question within it. Both
//! stages draw one sample per candidate from its decayed Beta distribution
//! and rank by sample, breaking ties in favour of the less-explored arm.
//!
//! If every question of the winning topic was already answered this
//! session, the next-ranked topic is tried. When nothing is left the
//! selector returns [`Selection::Exhausted`]; that is a normal result, not
//! an error.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::BanditConfig;
use crate::decay::effective_params_batch;
use crate::prior::{initial_prior, topic_prior};
use crate::thompson::{sample_beta, RandomSource};
use crate::types::{ArmStats, BetaParams, Difficulty};

// ==================== Data Structures ====================

/// One selectable arm. `stats` is `None` when the learner has never
/// answered it; such an arm behaves as if freshly seeded from `prior`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmCandidate {
    pub key: String,
    pub stats: Option<ArmStats>,
    pub prior: BetaParams,
}

impl ArmCandidate {
    pub fn question(id: impl Into<String>, difficulty: Difficulty, stats: Option<ArmStats>) -> Self {
        Self {
            key: id.into(),
            stats,
            prior: initial_prior(difficulty),
        }
    }

    pub fn topic(key: impl Into<String>, stats: Option<ArmStats>) -> Self {
        Self {
            key: key.into(),
            stats,
            prior: topic_prior(None),
        }
    }

    fn attempts(&self) -> i64 {
        self.stats.as_ref().map_or(0, |s| s.attempts)
    }

    fn stats_or_prior(&self) -> ArmStats {
        self.stats
            .clone()
            .unwrap_or_else(|| ArmStats::from_prior(self.prior))
    }
}

/// One Thompson draw for a candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Draw {
    /// Index into the candidate slice
    pub index: usize,
    pub sample: f64,
    pub attempts: i64,
    pub effective: BetaParams,
}

/// A chosen question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedQuestion {
    pub topic_key: String,
    pub question_id: String,
    pub topic_sample: f64,
    pub question_sample: f64,
    /// 0 when the top-sampled topic supplied the question
    pub topic_rank: usize,
}

/// Result of one selection request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Selection {
    Question(SelectedQuestion),
    /// Every candidate question has been answered this session
    Exhausted,
}

impl Selection {
    pub fn question_id(&self) -> Option<&str> {
        match self {
            Selection::Question(q) => Some(&q.question_id),
            Selection::Exhausted => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Selection::Exhausted)
    }
}

// ==================== Selector ====================

#[derive(Debug, Clone)]
pub struct HierarchicalSelector {
    half_life_days: f64,
}

impl HierarchicalSelector {
    pub fn new(config: &BanditConfig) -> Self {
        Self {
            half_life_days: config.half_life_days,
        }
    }

    /// Draw one sample per candidate and return the draws best-first.
    ///
    /// Ordering: highest sample first; equal samples prefer fewer attempts,
    /// then the earlier candidate.
    pub fn rank<R: RandomSource + ?Sized>(
        &self,
        rng: &mut R,
        candidates: &[ArmCandidate],
        now_ms: i64,
    ) -> Vec<Draw> {
        let arms: Vec<(ArmStats, BetaParams)> = candidates
            .iter()
            .map(|c| (c.stats_or_prior(), c.prior))
            .collect();
        let effective = effective_params_batch(&arms, now_ms, self.half_life_days);

        // Sampling stays sequential so a seeded source gives a stable order.
        let mut draws: Vec<Draw> = candidates
            .iter()
            .zip(effective)
            .enumerate()
            .map(|(index, (candidate, effective))| Draw {
                index,
                sample: sample_beta(&mut *rng, effective),
                attempts: candidate.attempts(),
                effective,
            })
            .collect();

        draws.sort_by(compare_draws);
        draws
    }

    /// Choose the next question.
    ///
    /// `questions_by_topic` maps a topic key to its candidate questions;
    /// ids in `answered` are skipped.
    pub fn select_next<R: RandomSource + ?Sized>(
        &self,
        rng: &mut R,
        topics: &[ArmCandidate],
        questions_by_topic: &HashMap<String, Vec<ArmCandidate>>,
        answered: &HashSet<String>,
        now_ms: i64,
    ) -> Selection {
        let topic_draws = self.rank(&mut *rng, topics, now_ms);

        for (topic_rank, topic_draw) in topic_draws.iter().enumerate() {
            let topic = &topics[topic_draw.index];
            let Some(questions) = questions_by_topic.get(&topic.key) else {
                continue;
            };

            let remaining: Vec<ArmCandidate> = questions
                .iter()
                .filter(|q| !answered.contains(&q.key))
                .cloned()
                .collect();
            if remaining.is_empty() {
                continue;
            }

            let question_draws = self.rank(&mut *rng, &remaining, now_ms);
            if let Some(best) = question_draws.first() {
                return Selection::Question(SelectedQuestion {
                    topic_key: topic.key.clone(),
                    question_id: remaining[best.index].key.clone(),
                    topic_sample: topic_draw.sample,
                    question_sample: best.sample,
                    topic_rank,
                });
            }
        }

        Selection::Exhausted
    }
}

fn compare_draws(a: &Draw, b: &Draw) -> Ordering {
    b.sample
        .total_cmp(&a.sample)
        .then_with(|| a.attempts.cmp(&b.attempts))
        .then_with(|| a.index.cmp(&b.index))
}
