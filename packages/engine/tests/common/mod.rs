//! Shared fixtures for engine integration tests: an in-memory sync
//! authority with last-write-wins merge, and a gated transport.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use quizmab_algo::Difficulty;
use quizmab_engine::sync::{QuestionArmPayload, TopicArmPayload};
use quizmab_engine::{
    EngineConfig, QuestionMeta, QuizService, StaticCatalog, Storage, SyncEngine, SyncRequest,
    SyncResponse, SyncTransport, SyncTransportError, TopicMeta,
};

pub const T0: i64 = 1_700_000_000_000;

/// Stored record plus the server clock reading at which it was accepted
#[derive(Debug, Clone)]
struct Stamped<P> {
    payload: P,
    received_at: i64,
}

#[derive(Default)]
struct AuthorityState {
    clock: i64,
    last_issued: i64,
    question_arms: HashMap<(String, String), Stamped<QuestionArmPayload>>,
    topic_arms: HashMap<(String, String), Stamped<TopicArmPayload>>,
    requests: Vec<SyncRequest>,
}

impl AuthorityState {
    /// Strictly increasing across requests even if the clock stands still
    fn tick(&mut self) -> i64 {
        let now = self.clock.max(self.last_issued + 1);
        self.last_issued = now;
        now
    }
}

/// In-memory server: LWW on `updated_at`, delta filtered by receipt time
#[derive(Default)]
pub struct MemoryAuthority {
    state: Mutex<AuthorityState>,
    fail_next: AtomicUsize,
}

impl MemoryAuthority {
    pub fn new(clock: i64) -> Arc<Self> {
        let authority = Self::default();
        authority.state.lock().clock = clock;
        Arc::new(authority)
    }

    pub fn set_clock(&self, clock: i64) {
        self.state.lock().clock = clock;
    }

    /// The next `n` exchanges fail before touching server state
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<SyncRequest> {
        self.state.lock().requests.clone()
    }

    pub fn question_arm(&self, user_id: &str, question_id: &str) -> Option<QuestionArmPayload> {
        self.state
            .lock()
            .question_arms
            .get(&(user_id.to_string(), question_id.to_string()))
            .map(|s| s.payload.clone())
    }

    pub fn question_arm_count(&self) -> usize {
        self.state.lock().question_arms.len()
    }

    /// Plant a record as if another client had uploaded it
    pub fn seed_question_arm(&self, user_id: &str, payload: QuestionArmPayload) {
        let mut state = self.state.lock();
        let received_at = state.tick();
        state.question_arms.insert(
            (user_id.to_string(), payload.question_id.clone()),
            Stamped {
                payload,
                received_at,
            },
        );
    }
}

fn merge<P: Clone>(
    store: &mut HashMap<(String, String), Stamped<P>>,
    user_id: &str,
    incoming: Vec<P>,
    key: impl Fn(&P) -> String,
    updated_at: impl Fn(&P) -> i64,
    received_at: i64,
) -> usize {
    let mut conflicts = 0;
    for payload in incoming {
        let id = (user_id.to_string(), key(&payload));
        let overwrites = match store.get(&id) {
            Some(existing) if updated_at(&payload) <= updated_at(&existing.payload) => continue,
            Some(_) => true,
            None => false,
        };
        if overwrites {
            conflicts += 1;
        }
        store.insert(
            id,
            Stamped {
                payload,
                received_at,
            },
        );
    }
    conflicts
}

fn delta<P: Clone>(
    store: &HashMap<(String, String), Stamped<P>>,
    user_id: &str,
    since: i64,
) -> Vec<P> {
    store
        .iter()
        .filter(|((user, _), stamped)| user == user_id && stamped.received_at > since)
        .map(|(_, stamped)| stamped.payload.clone())
        .collect()
}

#[async_trait]
impl SyncTransport for MemoryAuthority {
    async fn exchange(
        &self,
        user_id: &str,
        request: SyncRequest,
    ) -> Result<SyncResponse, SyncTransportError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncTransportError::Network("authority unreachable".to_string()));
        }

        let mut state = self.state.lock();
        state.requests.push(request.clone());
        let server_time = state.tick();

        let mut conflicts_resolved = merge(
            &mut state.question_arms,
            user_id,
            request.question_arms,
            |p| p.question_id.clone(),
            |p| p.updated_at,
            server_time,
        );
        conflicts_resolved += merge(
            &mut state.topic_arms,
            user_id,
            request.topic_arms,
            |p| p.topic_key.clone(),
            |p| p.updated_at,
            server_time,
        );

        Ok(SyncResponse {
            server_time,
            question_arms: delta(&state.question_arms, user_id, request.last_sync_time),
            topic_arms: delta(&state.topic_arms, user_id, request.last_sync_time),
            conflicts_resolved,
        })
    }
}

/// Wraps a transport and parks every exchange until released
pub struct GatedTransport {
    inner: Arc<dyn SyncTransport>,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedTransport {
    pub fn new(inner: Arc<dyn SyncTransport>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            entered: Notify::new(),
            release: Notify::new(),
        })
    }
}

#[async_trait]
impl SyncTransport for GatedTransport {
    async fn exchange(
        &self,
        user_id: &str,
        request: SyncRequest,
    ) -> Result<SyncResponse, SyncTransportError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.exchange(user_id, request).await
    }
}

// ==================== Device fixtures ====================

pub fn catalog() -> StaticCatalog {
    let renal = TopicMeta::new("pharm", "renal", "dosage");
    let cardio = TopicMeta::new("pharm", "cardio", "side_effect");

    let mut catalog = StaticCatalog::new()
        .with_topic(renal.clone())
        .with_topic(cardio.clone());
    for (i, difficulty) in [Difficulty::Beginner, Difficulty::Intermediate, Difficulty::Advanced]
        .into_iter()
        .enumerate()
    {
        catalog = catalog
            .with_question(QuestionMeta {
                id: format!("renal-{}", i),
                topic_key: renal.key.clone(),
                difficulty,
                expected_time_ms: 8_000,
            })
            .with_question(QuestionMeta {
                id: format!("cardio-{}", i),
                topic_key: cardio.key.clone(),
                difficulty,
                expected_time_ms: 8_000,
            });
    }
    catalog
}

/// One client: its own database, quiz service and sync engine
pub struct Device {
    pub storage: Storage,
    pub quiz: QuizService<StaticCatalog>,
    pub sync: SyncEngine,
}

impl Device {
    pub fn new(transport: Arc<dyn SyncTransport>, seed: u64) -> Self {
        let config = EngineConfig {
            rng_seed: Some(seed),
            ..Default::default()
        };
        let storage = Storage::in_memory().expect("Failed to create in-memory storage");
        Self {
            quiz: QuizService::new(storage.clone(), catalog(), &config),
            sync: SyncEngine::new(storage.clone(), transport, config.sync_timeout),
            storage,
        }
    }
}
