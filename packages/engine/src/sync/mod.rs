//! 同步引擎模块
//!
//! 负责本地臂统计量与远端权威之间的增量同步：
//! - 上传 `updated_at > lastSyncTime` 或尚未同步的记录
//! - 按 updated_at 最后写入优先合并服务器增量
//! - 成功后才推进 lastSyncTime，失败可原样重试
//!
//! 共享同一个 [`Storage`] 的所有引擎，每个用户同一时刻只允许一个同步周期，
//! 重入调用直接返回
//! [`EngineError::SyncInProgress`]。

pub mod transport;

pub use transport::{
    HttpSyncTransport, QuestionArmPayload, SyncRequest, SyncResponse, SyncTransport,
    SyncTransportError, TopicArmPayload,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::storage::models::from_millis;
use crate::storage::{ArmRecord, QuestionArm, Storage, TopicArm};

// ============================================================
// 同步状态与结果
// ============================================================

/// 单个同步周期的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Uploading,
    AwaitingServerMerge,
    ApplyingServerDelta,
    /// 本周期失败，周期结束后回到 Idle
    Failed,
}

/// 同步结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub success: bool,
    /// 上传的记录数（题目臂 + 主题臂）
    pub uploaded: usize,
    /// 服务器返回的记录数
    pub downloaded: usize,
    /// 写入本地的记录数
    pub applied: usize,
    /// 丢弃的记录数（不比本地新，或未通过校验）
    pub discarded: usize,
    pub conflicts_resolved: usize,
    pub server_time: Option<i64>,
    pub error: Option<String>,
}

impl SyncReport {
    fn failed(uploaded: usize, error: impl ToString) -> Self {
        Self {
            success: false,
            uploaded,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

/// 本地同步状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub user_id: String,
    pub question_arms: i64,
    pub topic_arms: i64,
    pub pending_question_arms: i64,
    pub pending_topic_arms: i64,
    /// 从未同步为 0
    pub last_sync_time: i64,
    pub phase: SyncPhase,
}

impl SyncStatus {
    /// 从本地存储读取计数与同步时间
    pub fn load(storage: &Storage, user_id: &str, phase: SyncPhase) -> EngineResult<Self> {
        let questions = storage.question_arms();
        let topics = storage.topic_arms();

        Ok(Self {
            user_id: user_id.to_string(),
            question_arms: questions.count_by_user(user_id)?,
            topic_arms: topics.count_by_user(user_id)?,
            pending_question_arms: questions.count_pending(user_id)?,
            pending_topic_arms: topics.count_pending(user_id)?,
            last_sync_time: storage.last_sync_time(user_id)?,
            phase,
        })
    }
}

// ============================================================
// 重入保护
// ============================================================

/// 进行中的同步周期，按用户记录阶段；由 [`Storage`] 持有并在克隆间共享
pub(crate) type PhaseMap = Mutex<HashMap<String, SyncPhase>>;

/// 同步周期占位；释放时（包括 future 被取消）清除该用户的阶段
struct CycleGuard<'a> {
    phases: &'a PhaseMap,
    user_id: String,
}

impl<'a> CycleGuard<'a> {
    fn acquire(phases: &'a PhaseMap, user_id: &str) -> EngineResult<Self> {
        let mut map = phases.lock();
        if map.contains_key(user_id) {
            return Err(EngineError::SyncInProgress {
                user_id: user_id.to_string(),
            });
        }
        map.insert(user_id.to_string(), SyncPhase::Uploading);
        Ok(Self {
            phases,
            user_id: user_id.to_string(),
        })
    }

    fn enter(&self, phase: SyncPhase) {
        self.phases.lock().insert(self.user_id.clone(), phase);
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.phases.lock().remove(&self.user_id);
    }
}

// ============================================================
// SyncEngine - 同步引擎
// ============================================================

pub struct SyncEngine {
    storage: Storage,
    transport: Arc<dyn SyncTransport>,
    timeout: Duration,
}

impl SyncEngine {
    pub fn new(storage: Storage, transport: Arc<dyn SyncTransport>, timeout: Duration) -> Self {
        Self {
            storage,
            transport,
            timeout,
        }
    }

    /// 当前阶段；没有进行中的周期时为 Idle
    pub fn phase(&self, user_id: &str) -> SyncPhase {
        self.storage
            .sync_phases()
            .lock()
            .get(user_id)
            .copied()
            .unwrap_or(SyncPhase::Idle)
    }

    /// 执行一次增量同步
    ///
    /// 传输失败或超时返回 `success = false` 的结果，lastSyncTime 不变；
    /// 本地存储错误作为 `Err` 返回。
    pub async fn sync(&self, user_id: &str) -> EngineResult<SyncReport> {
        let guard = CycleGuard::acquire(self.storage.sync_phases(), user_id)?;
        self.run_cycle(&guard, user_id).await
    }

    /// 完整同步：先将 lastSyncTime 重置为 epoch，再执行正常周期
    pub async fn force_full_sync(&self, user_id: &str) -> EngineResult<SyncReport> {
        let guard = CycleGuard::acquire(self.storage.sync_phases(), user_id)?;
        info!(user_id, "重置同步时间，开始完整同步");
        self.storage.reset_last_sync_time(user_id)?;
        self.run_cycle(&guard, user_id).await
    }

    pub fn status(&self, user_id: &str) -> EngineResult<SyncStatus> {
        SyncStatus::load(&self.storage, user_id, self.phase(user_id))
    }

    async fn run_cycle(&self, guard: &CycleGuard<'_>, user_id: &str) -> EngineResult<SyncReport> {
        match self.exchange_and_apply(guard, user_id).await {
            Ok(report) => Ok(report),
            Err(e) => {
                guard.enter(SyncPhase::Failed);
                warn!(user_id, error = %e, "同步失败，本地状态未推进");
                Err(e)
            }
        }
    }

    async fn exchange_and_apply(
        &self,
        guard: &CycleGuard<'_>,
        user_id: &str,
    ) -> EngineResult<SyncReport> {
        let questions = self.storage.question_arms();
        let topics = self.storage.topic_arms();

        // ========== Uploading: 计算上传增量 ==========
        guard.enter(SyncPhase::Uploading);
        let last_sync_time = self.storage.last_sync_time(user_id)?;
        let outbound_questions = questions.list_modified_since(user_id, last_sync_time)?;
        let outbound_topics = topics.list_modified_since(user_id, last_sync_time)?;
        let uploaded = outbound_questions.len() + outbound_topics.len();

        info!(
            user_id,
            last_sync_time,
            question_arms = outbound_questions.len(),
            topic_arms = outbound_topics.len(),
            "开始同步"
        );

        let request = SyncRequest {
            last_sync_time,
            question_arms: outbound_questions.iter().map(QuestionArmPayload::from_arm).collect(),
            topic_arms: outbound_topics.iter().map(TopicArmPayload::from_arm).collect(),
        };

        // ========== AwaitingServerMerge: 远端交换 ==========
        guard.enter(SyncPhase::AwaitingServerMerge);
        let exchanged =
            tokio::time::timeout(self.timeout, self.transport.exchange(user_id, request)).await;

        let response = match exchanged {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Ok(self.transport_failed(guard, user_id, uploaded, e)),
            Err(_) => {
                let e = SyncTransportError::Timeout(self.timeout);
                return Ok(self.transport_failed(guard, user_id, uploaded, e));
            }
        };

        // ========== ApplyingServerDelta: 最后写入优先合并 ==========
        guard.enter(SyncPhase::ApplyingServerDelta);
        let synced_at = from_millis(response.server_time);
        let downloaded = response.question_arms.len() + response.topic_arms.len();

        let incoming_questions = valid_only(
            user_id,
            response
                .question_arms
                .into_iter()
                .map(|p| p.into_arm(user_id))
                .collect(),
        );
        let incoming_topics = valid_only(
            user_id,
            response
                .topic_arms
                .into_iter()
                .map(|p| p.into_arm(user_id))
                .collect(),
        );

        let question_counts = questions.merge_newer(
            user_id,
            &incoming_questions,
            synced_at,
            |local: &QuestionArm, incoming: &QuestionArm| local.apply_full_state(incoming),
        )?;
        let topic_counts = topics.merge_newer(
            user_id,
            &incoming_topics,
            synced_at,
            |local: &TopicArm, incoming: &TopicArm| local.apply_full_state(incoming),
        )?;
        let applied = question_counts.applied + topic_counts.applied;

        questions.mark_synced(user_id, &outbound_questions, synced_at)?;
        topics.mark_synced(user_id, &outbound_topics, synced_at)?;

        // 全部写入成功后才推进
        self.storage.set_last_sync_time(user_id, response.server_time)?;
        guard.enter(SyncPhase::Idle);

        let report = SyncReport {
            success: true,
            uploaded,
            downloaded,
            applied,
            discarded: downloaded - applied,
            conflicts_resolved: response.conflicts_resolved,
            server_time: Some(response.server_time),
            error: None,
        };

        info!(
            user_id,
            uploaded = report.uploaded,
            downloaded = report.downloaded,
            applied = report.applied,
            discarded = report.discarded,
            conflicts_resolved = report.conflicts_resolved,
            server_time = response.server_time,
            "同步完成"
        );

        Ok(report)
    }

    fn transport_failed(
        &self,
        guard: &CycleGuard<'_>,
        user_id: &str,
        uploaded: usize,
        error: SyncTransportError,
    ) -> SyncReport {
        guard.enter(SyncPhase::Failed);
        warn!(user_id, error = %error, "同步传输失败，lastSyncTime 保持不变");
        SyncReport::failed(uploaded, error)
    }
}

/// 过滤未通过不变量校验的服务器记录
fn valid_only<A: ArmRecord>(user_id: &str, arms: Vec<A>) -> Vec<A> {
    arms.into_iter()
        .filter(|arm| match arm.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    user_id,
                    table = A::TABLE,
                    key = arm.subject_key(),
                    error = %e,
                    "丢弃无效的服务器记录"
                );
                false
            }
        })
        .collect()
}

// ============================================================
// 测试
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quizmab_algo::{BanditConfig, Difficulty, Outcome};

    const T0: i64 = 1_700_000_000_000;

    /// 固定响应的传输，记录最后一次请求
    struct Canned {
        response: Result<SyncResponse, SyncTransportError>,
        last_request: Mutex<Option<SyncRequest>>,
    }

    impl Canned {
        fn ok(response: SyncResponse) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(response),
                last_request: Mutex::new(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                response: Err(SyncTransportError::Network("connection refused".to_string())),
                last_request: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl SyncTransport for Canned {
        async fn exchange(
            &self,
            _user_id: &str,
            request: SyncRequest,
        ) -> Result<SyncResponse, SyncTransportError> {
            *self.last_request.lock() = Some(request);
            self.response.clone()
        }
    }

    /// 永不返回的传输
    struct Hanging;

    #[async_trait]
    impl SyncTransport for Hanging {
        async fn exchange(
            &self,
            _user_id: &str,
            _request: SyncRequest,
        ) -> Result<SyncResponse, SyncTransportError> {
            std::future::pending().await
        }
    }

    fn answered(storage: &Storage, question: &str, at_ms: i64) -> QuestionArm {
        let arm = QuestionArm::seeded("user-1", question, Difficulty::Beginner, from_millis(at_ms))
            .apply_outcome(
                &Outcome::new(true, 2_000, 8_000),
                from_millis(at_ms),
                &BanditConfig::default(),
            )
            .unwrap();
        storage.question_arms().put(&arm).unwrap();
        arm
    }

    #[tokio::test]
    async fn test_successful_cycle_advances_last_sync_time() {
        let storage = Storage::in_memory().unwrap();
        answered(&storage, "q-1", T0);

        let transport = Canned::ok(SyncResponse {
            server_time: T0 + 10_000,
            ..Default::default()
        });
        let engine = SyncEngine::new(storage.clone(), transport.clone(), Duration::from_secs(30));

        let report = engine.sync("user-1").await.unwrap();
        assert!(report.success);
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.server_time, Some(T0 + 10_000));
        assert_eq!(storage.last_sync_time("user-1").unwrap(), T0 + 10_000);

        let request = transport.last_request.lock().clone().unwrap();
        assert_eq!(request.last_sync_time, 0);
        assert_eq!(request.question_arms[0].question_id, "q-1");

        let status = engine.status("user-1").unwrap();
        assert_eq!(status.question_arms, 1);
        assert_eq!(status.pending_question_arms, 0);
        assert_eq!(status.phase, SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_last_sync_time() {
        let storage = Storage::in_memory().unwrap();
        storage.set_last_sync_time("user-1", T0).unwrap();
        answered(&storage, "q-1", T0 + 1_000);

        let engine = SyncEngine::new(storage.clone(), Canned::failing(), Duration::from_secs(30));
        let report = engine.sync("user-1").await.unwrap();

        assert!(!report.success);
        assert_eq!(report.uploaded, 1);
        assert!(report.error.unwrap().contains("connection refused"));
        assert_eq!(storage.last_sync_time("user-1").unwrap(), T0);
        assert_eq!(storage.question_arms().count_pending("user-1").unwrap(), 1);
        assert_eq!(engine.phase("user-1"), SyncPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failed_cycle() {
        let storage = Storage::in_memory().unwrap();
        answered(&storage, "q-1", T0);

        let engine = SyncEngine::new(storage.clone(), Arc::new(Hanging), Duration::from_secs(30));
        let report = engine.sync("user-1").await.unwrap();

        assert!(!report.success);
        assert!(report.error.is_some());
        assert_eq!(storage.last_sync_time("user-1").unwrap(), 0);
        assert_eq!(engine.phase("user-1"), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_invalid_server_records_are_discarded() {
        let storage = Storage::in_memory().unwrap();
        let mut broken = QuestionArmPayload::from_arm(&QuestionArm::seeded(
            "user-1",
            "q-bad",
            Difficulty::Beginner,
            from_millis(T0),
        ));
        broken.attempts = 5;
        let good = QuestionArmPayload::from_arm(&QuestionArm::seeded(
            "user-1",
            "q-good",
            Difficulty::Beginner,
            from_millis(T0),
        ));

        let transport = Canned::ok(SyncResponse {
            server_time: T0 + 1,
            question_arms: vec![broken, good],
            ..Default::default()
        });
        let engine = SyncEngine::new(storage.clone(), transport, Duration::from_secs(30));
        let report = engine.sync("user-1").await.unwrap();

        assert!(report.success);
        assert_eq!(report.downloaded, 2);
        assert_eq!(report.applied, 1);
        assert_eq!(report.discarded, 1);
        assert!(storage.question_arms().get("user-1", "q-bad").unwrap().is_none());
        assert!(storage.question_arms().get("user-1", "q-good").unwrap().unwrap().is_synced);
    }

    #[tokio::test]
    async fn test_force_full_sync_resends_everything() {
        let storage = Storage::in_memory().unwrap();
        let arm = answered(&storage, "q-1", T0);
        storage
            .question_arms()
            .mark_synced("user-1", &[arm], from_millis(T0 + 50_000))
            .unwrap();
        storage.set_last_sync_time("user-1", T0 + 50_000).unwrap();

        let transport = Canned::ok(SyncResponse {
            server_time: T0 + 60_000,
            ..Default::default()
        });
        let engine = SyncEngine::new(storage.clone(), transport.clone(), Duration::from_secs(30));

        let delta = engine.sync("user-1").await.unwrap();
        assert_eq!(delta.uploaded, 0);

        let full = engine.force_full_sync("user-1").await.unwrap();
        assert_eq!(full.uploaded, 1);
        assert_eq!(transport.last_request.lock().as_ref().unwrap().last_sync_time, 0);
        assert_eq!(storage.last_sync_time("user-1").unwrap(), T0 + 60_000);
    }

    #[test]
    fn test_guard_rejects_reentry_and_releases() {
        let phases: PhaseMap = Mutex::new(HashMap::new());
        let guard = CycleGuard::acquire(&phases, "user-1").unwrap();
        assert!(matches!(
            CycleGuard::acquire(&phases, "user-1"),
            Err(EngineError::SyncInProgress { .. })
        ));
        assert!(CycleGuard::acquire(&phases, "user-2").is_ok());

        drop(guard);
        assert!(CycleGuard::acquire(&phases, "user-1").is_ok());
    }
}
