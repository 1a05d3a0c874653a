//! Quiz service
//!
//! Binds the arm store, the bandit configuration, a random source and a
//! content catalog into the two calls a quiz UI needs: pick the next
//! question, and record an answer.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use quizmab_algo::{
    classify, entropy_rng, expected_secs_for, seeded_rng, ArmCandidate, BanditConfig, Difficulty,
    DifficultyEstimate, HierarchicalSelector, Outcome, PerformanceSample, Selection,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::storage::{ArmRecord, DeletedCounts, QuestionArm, Storage, TopicArm};

// ==================== Content Catalog ====================

/// Question metadata owned by the content collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionMeta {
    pub id: String,
    pub topic_key: String,
    pub difficulty: Difficulty,
    pub expected_time_ms: i64,
}

impl QuestionMeta {
    /// Question whose expected answer time follows its topic's knowledge type
    pub fn for_topic(id: impl Into<String>, topic: &TopicMeta, difficulty: Difficulty) -> Self {
        let expected_secs = expected_secs_for(&topic.knowledge_type);
        Self {
            id: id.into(),
            topic_key: topic.key.clone(),
            difficulty,
            expected_time_ms: (expected_secs * 1000.0).round() as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMeta {
    pub key: String,
    pub course: String,
    pub topic: String,
    pub knowledge_type: String,
}

impl TopicMeta {
    pub fn new(
        course: impl Into<String>,
        topic: impl Into<String>,
        knowledge_type: impl Into<String>,
    ) -> Self {
        let topic = topic.into();
        let knowledge_type = knowledge_type.into();
        Self {
            key: TopicArm::make_key(&topic, &knowledge_type),
            course: course.into(),
            topic,
            knowledge_type,
        }
    }
}

/// Read-only view of the question bank
pub trait ContentCatalog: Send + Sync {
    fn question(&self, id: &str) -> Option<QuestionMeta>;

    fn topics(&self) -> Vec<TopicMeta>;

    fn questions_for_topic(&self, topic_key: &str) -> Vec<QuestionMeta>;

    fn topic(&self, key: &str) -> Option<TopicMeta> {
        self.topics().into_iter().find(|t| t.key == key)
    }
}

/// In-memory catalog, ordered by key so selection ties are reproducible
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    topics: BTreeMap<String, TopicMeta>,
    questions: BTreeMap<String, QuestionMeta>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topic(mut self, topic: TopicMeta) -> Self {
        self.topics.insert(topic.key.clone(), topic);
        self
    }

    pub fn with_question(mut self, question: QuestionMeta) -> Self {
        self.questions.insert(question.id.clone(), question);
        self
    }

    /// Re-tier a question from aggregate learner performance.
    ///
    /// Returns `None` and leaves the authored tier in place while the
    /// sample is below `min_sample_size` or the question is unknown.
    pub fn retier(
        &mut self,
        question_id: &str,
        sample: &PerformanceSample,
        min_sample_size: i64,
    ) -> Option<DifficultyEstimate> {
        let question = self.questions.get_mut(question_id)?;
        let estimate = classify(sample, min_sample_size)?;
        if question.difficulty != estimate.difficulty {
            debug!(
                question_id,
                from = %question.difficulty,
                to = %estimate.difficulty,
                score = estimate.score,
                "question re-tiered"
            );
        }
        question.difficulty = estimate.difficulty;
        Some(estimate)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

impl ContentCatalog for StaticCatalog {
    fn question(&self, id: &str) -> Option<QuestionMeta> {
        self.questions.get(id).cloned()
    }

    fn topics(&self) -> Vec<TopicMeta> {
        self.topics.values().cloned().collect()
    }

    fn questions_for_topic(&self, topic_key: &str) -> Vec<QuestionMeta> {
        self.questions
            .values()
            .filter(|q| q.topic_key == topic_key)
            .cloned()
            .collect()
    }

    fn topic(&self, key: &str) -> Option<TopicMeta> {
        self.topics.get(key).cloned()
    }
}

// ==================== Session ====================

/// One sitting of a learner; lives in memory only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSession {
    pub user_id: String,
    pub answered: HashSet<String>,
    pub correct: u32,
    pub total: u32,
    pub started_at: DateTime<Utc>,
}

impl QuizSession {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.correct) / f64::from(self.total)
        }
    }
}

/// Both arms written by one answer
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerRecord {
    pub question_arm: QuestionArm,
    pub topic_arm: TopicArm,
}

// ==================== Service ====================

pub struct QuizService<C: ContentCatalog> {
    storage: Storage,
    catalog: C,
    config: BanditConfig,
    selector: HierarchicalSelector,
    rng: Mutex<ChaCha8Rng>,
}

impl<C: ContentCatalog> QuizService<C> {
    pub fn new(storage: Storage, catalog: C, config: &EngineConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => seeded_rng(seed),
            None => entropy_rng(),
        };

        Self {
            storage,
            catalog,
            selector: HierarchicalSelector::new(&config.bandit),
            config: config.bandit.clone(),
            rng: Mutex::new(rng),
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn start_session(&self, user_id: &str, now: DateTime<Utc>) -> EngineResult<QuizSession> {
        require_user(user_id)?;
        info!(user_id, "session started");
        Ok(QuizSession {
            user_id: user_id.to_string(),
            answered: HashSet::new(),
            correct: 0,
            total: 0,
            started_at: now,
        })
    }

    /// Pick the next question for the session.
    ///
    /// Arms the learner has never answered are sampled from their priors
    /// without being written.
    pub fn request_next_question(
        &self,
        session: &QuizSession,
        now: DateTime<Utc>,
    ) -> EngineResult<Selection> {
        require_user(&session.user_id)?;

        let question_arms: HashMap<String, QuestionArm> = self
            .storage
            .question_arms()
            .list_by_user(&session.user_id)?
            .into_iter()
            .map(|arm| (arm.question_id.clone(), arm))
            .collect();
        let topic_arms: HashMap<String, TopicArm> = self
            .storage
            .topic_arms()
            .list_by_user(&session.user_id)?
            .into_iter()
            .map(|arm| (arm.topic_key.clone(), arm))
            .collect();

        let topics = self.catalog.topics();
        let topic_candidates: Vec<ArmCandidate> = topics
            .iter()
            .map(|t| ArmCandidate::topic(&t.key, topic_arms.get(&t.key).map(|a| a.stats.clone())))
            .collect();

        let questions_by_topic: HashMap<String, Vec<ArmCandidate>> = topics
            .iter()
            .map(|t| {
                let candidates = self
                    .catalog
                    .questions_for_topic(&t.key)
                    .into_iter()
                    .map(|q| {
                        let stats = question_arms.get(&q.id).map(|a| a.stats.clone());
                        ArmCandidate::question(q.id, q.difficulty, stats)
                    })
                    .collect();
                (t.key.clone(), candidates)
            })
            .collect();

        let selection = {
            let mut rng = self.rng.lock();
            self.selector.select_next(
                &mut *rng,
                &topic_candidates,
                &questions_by_topic,
                &session.answered,
                now.timestamp_millis(),
            )
        };

        match &selection {
            Selection::Question(q) => debug!(
                user_id = %session.user_id,
                question_id = %q.question_id,
                topic_key = %q.topic_key,
                topic_rank = q.topic_rank,
                "question selected"
            ),
            Selection::Exhausted => info!(
                user_id = %session.user_id,
                answered = session.answered.len(),
                "question pool exhausted"
            ),
        }

        Ok(selection)
    }

    /// Record an answer: update the question arm and its topic arm, write
    /// both in one transaction, and mark the question answered.
    pub fn report_outcome(
        &self,
        session: &mut QuizSession,
        question_id: &str,
        selected_answer: &str,
        is_correct: bool,
        response_time_ms: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<AnswerRecord> {
        require_user(&session.user_id)?;
        let meta = self
            .catalog
            .question(question_id)
            .ok_or_else(|| EngineError::UnknownQuestion(question_id.to_string()))?;
        let owner = session.user_id.clone();
        let user_id = owner.as_str();

        debug!(user_id, question_id, selected_answer, is_correct, response_time_ms, "answer received");

        let outcome = Outcome::new(is_correct, response_time_ms, meta.expected_time_ms);

        let question_arm = self
            .storage
            .question_arms()
            .get(user_id, question_id)?
            .unwrap_or_else(|| QuestionArm::seeded(user_id, question_id, meta.difficulty, now))
            .apply_outcome(&outcome, now, &self.config)?;

        let topic_arm = self
            .storage
            .topic_arms()
            .get(user_id, &meta.topic_key)?
            .unwrap_or_else(|| self.seed_topic(user_id, &meta.topic_key, now))
            .apply_outcome(&outcome, now, &self.config)?;

        self.storage.transaction(|conn| {
            question_arm.upsert(conn)?;
            topic_arm.upsert(conn)?;
            Ok(())
        })?;

        session.answered.insert(question_id.to_string());
        session.total += 1;
        if is_correct {
            session.correct += 1;
        }

        info!(
            user_id,
            question_id,
            is_correct,
            alpha = question_arm.stats.alpha,
            beta = question_arm.stats.beta,
            topic_key = %topic_arm.topic_key,
            "outcome recorded"
        );

        Ok(AnswerRecord {
            question_arm,
            topic_arm,
        })
    }

    /// Delete every arm and the sync watermark for the user
    pub fn reset_user(&self, user_id: &str) -> EngineResult<DeletedCounts> {
        require_user(user_id)?;
        Ok(self.storage.delete_all_for_user(user_id)?)
    }

    fn seed_topic(&self, user_id: &str, topic_key: &str, now: DateTime<Utc>) -> TopicArm {
        match self.catalog.topic(topic_key) {
            Some(t) => TopicArm::seeded(user_id, t.key, t.course, t.topic, t.knowledge_type, now),
            None => {
                warn!(user_id, topic_key, "topic missing from catalog, seeding without metadata");
                TopicArm::seeded(user_id, topic_key, "", "", "", now)
            }
        }
    }
}

fn require_user(user_id: &str) -> EngineResult<()> {
    if user_id.trim().is_empty() {
        return Err(EngineError::MissingUserId);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::from_millis;

    const NOW: i64 = 1_700_000_000_000;

    fn question(id: &str, topic_key: &str, difficulty: Difficulty) -> QuestionMeta {
        QuestionMeta {
            id: id.to_string(),
            topic_key: topic_key.to_string(),
            difficulty,
            expected_time_ms: 8_000,
        }
    }

    fn service() -> QuizService<StaticCatalog> {
        let renal = TopicMeta::new("pharm", "renal", "dosage");
        let catalog = StaticCatalog::new()
            .with_topic(renal.clone())
            .with_question(question("q-1", &renal.key, Difficulty::Beginner))
            .with_question(question("q-2", &renal.key, Difficulty::Advanced));
        let config = EngineConfig {
            rng_seed: Some(7),
            ..Default::default()
        };
        QuizService::new(
            Storage::in_memory().expect("Failed to create in-memory storage"),
            catalog,
            &config,
        )
    }

    #[test]
    fn test_topic_meta_key() {
        assert_eq!(TopicMeta::new("pharm", "renal", "dosage").key, "renal_dosage");
    }

    #[test]
    fn test_session_requires_user() {
        let service = service();
        assert!(matches!(
            service.start_session("  ", from_millis(NOW)),
            Err(EngineError::MissingUserId)
        ));
    }

    #[test]
    fn test_report_outcome_writes_both_arms() {
        let service = service();
        let mut session = service.start_session("user-1", from_millis(NOW)).unwrap();

        let record = service
            .report_outcome(&mut session, "q-1", "B", true, 4_000, from_millis(NOW))
            .unwrap();

        assert_eq!(record.question_arm.stats.attempts, 1);
        assert_eq!(record.topic_arm.stats.attempts, 1);
        assert_eq!(record.topic_arm.course, "pharm");
        assert_eq!(session.total, 1);
        assert_eq!(session.correct, 1);
        assert!(session.answered.contains("q-1"));

        let stored = service.storage().question_arms().get("user-1", "q-1").unwrap();
        assert_eq!(stored, Some(record.question_arm));
        assert_eq!(service.storage().topic_arms().count_by_user("user-1").unwrap(), 1);
    }

    #[test]
    fn test_unknown_question_is_rejected() {
        let service = service();
        let mut session = service.start_session("user-1", from_millis(NOW)).unwrap();
        let result = service.report_outcome(&mut session, "q-404", "A", true, 1_000, from_millis(NOW));
        assert!(matches!(result, Err(EngineError::UnknownQuestion(_))));
        assert_eq!(session.total, 0);
    }

    #[test]
    fn test_selection_does_not_write_arms() {
        let service = service();
        let session = service.start_session("user-1", from_millis(NOW)).unwrap();
        let selection = service.request_next_question(&session, from_millis(NOW)).unwrap();
        assert!(selection.question_id().is_some());
        assert_eq!(service.storage().question_arms().count_by_user("user-1").unwrap(), 0);
    }

    #[test]
    fn test_question_time_follows_knowledge_type() {
        let terms = TopicMeta::new("pharm", "receptors", "terminology");
        let kinetics = TopicMeta::new("pharm", "clearance", "pharmacokinetics");
        let other = TopicMeta::new("pharm", "misc", "trivia");

        let q = QuestionMeta::for_topic("q-1", &terms, Difficulty::Beginner);
        assert_eq!(q.topic_key, terms.key);
        assert_eq!(q.expected_time_ms, 15_000);
        assert_eq!(
            QuestionMeta::for_topic("q-2", &kinetics, Difficulty::Advanced).expected_time_ms,
            40_000
        );
        assert_eq!(
            QuestionMeta::for_topic("q-3", &other, Difficulty::Intermediate).expected_time_ms,
            30_000
        );
    }

    #[test]
    fn test_retier_needs_enough_samples() {
        let mut catalog = StaticCatalog::new().with_question(question("q-1", "t_k", Difficulty::Beginner));
        let thin = PerformanceSample {
            total_attempts: 3,
            total_correct: 0,
            unique_users: 3,
            active_users: 10,
            avg_response_secs: 60.0,
            expected_secs: 30.0,
        };
        assert!(catalog.retier("q-1", &thin, 10).is_none());
        assert_eq!(catalog.question("q-1").unwrap().difficulty, Difficulty::Beginner);

        let hard = PerformanceSample {
            total_attempts: 100,
            total_correct: 5,
            ..thin
        };
        let estimate = catalog.retier("q-1", &hard, 10).unwrap();
        assert_eq!(catalog.question("q-1").unwrap().difficulty, estimate.difficulty);
        assert_ne!(estimate.difficulty, Difficulty::Beginner);
    }
}
