//! 臂记录数据模型
//!
//! 题目臂与主题臂在算法层的 [`ArmStats`] 之上补充身份、时间戳与同步标记。
//! 数据库中所有时间戳均为毫秒级 epoch 整数。

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use quizmab_algo::sanitize::validate_arm_stats;
use quizmab_algo::{
    apply_full_state, apply_outcome, initial_prior, topic_prior, ArmStats, BanditConfig,
    BanditError, BetaParams, Difficulty, Outcome,
};

use crate::storage::{StorageError, StorageResult};

// ============================================================
// 时间戳工具
// ============================================================

/// 毫秒时间戳转 UTC 时间，越界值回退到 epoch
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// 下一个 updated_at：不早于 now，且严格大于上一次的值
pub fn next_updated_at(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + Duration::milliseconds(1);
    if now > floor {
        now
    } else {
        floor
    }
}

fn stats_from_row(row: &Row) -> rusqlite::Result<ArmStats> {
    Ok(ArmStats {
        attempts: row.get("attempts")?,
        successes: row.get("successes")?,
        failures: row.get("failures")?,
        total_response_time_ms: row.get("total_response_time_ms")?,
        user_confidence: row.get("user_confidence")?,
        alpha: row.get("alpha")?,
        beta: row.get("beta")?,
        last_attempted_at: row.get("last_attempted_at")?,
    })
}

// ============================================================
// ArmRecord - 题目臂与主题臂的公共接口
// ============================================================

/// 可存储、可同步的臂记录
pub trait ArmRecord: Clone + Send + Sync + 'static {
    /// 表名
    const TABLE: &'static str;
    /// 主体键列名 (question_id / topic_key)
    const KEY_COLUMN: &'static str;

    fn user_id(&self) -> &str;
    fn subject_key(&self) -> &str;
    fn stats(&self) -> &ArmStats;
    fn prior(&self) -> BetaParams;
    fn updated_at(&self) -> DateTime<Utc>;
    fn is_synced(&self) -> bool;

    /// 标记为已同步，不改变 updated_at
    fn mark_synced(&mut self, synced_at: DateTime<Utc>);

    fn from_row(row: &Row) -> rusqlite::Result<Self>;

    /// 按 (user_id, 主体键) 插入或整体替换
    fn upsert(&self, conn: &Connection) -> StorageResult<()>;

    /// 校验统计量不变量与身份字段
    fn validate(&self) -> StorageResult<()> {
        if self.user_id().is_empty() || self.subject_key().is_empty() {
            return Err(StorageError::InvalidState(BanditError::InvalidState(format!(
                "{} 记录缺少 user_id 或主体键",
                Self::TABLE
            ))));
        }
        validate_arm_stats(self.stats())?;
        Ok(())
    }

    /// 最后写入优先：本地不存在，或传入记录的 updated_at 严格更新
    fn supersedes(&self, local: Option<&Self>) -> bool {
        match local {
            Some(local) => self.updated_at() > local.updated_at(),
            None => true,
        }
    }
}

// ============================================================
// QuestionArm - 题目臂
// ============================================================

/// 用户 × 题目 的臂
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionArm {
    pub user_id: String,
    pub question_id: String,
    pub difficulty: Difficulty,
    pub stats: ArmStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
}

impl QuestionArm {
    /// 由难度先验创建新臂（仅在首次作答时调用）
    pub fn seeded(
        user_id: impl Into<String>,
        question_id: impl Into<String>,
        difficulty: Difficulty,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            question_id: question_id.into(),
            difficulty,
            stats: ArmStats::from_prior(initial_prior(difficulty)),
            created_at: now,
            updated_at: now,
            is_synced: false,
            synced_at: None,
        }
    }

    /// 作答更新，返回新记录；原记录不变
    pub fn apply_outcome(
        &self,
        outcome: &Outcome,
        now: DateTime<Utc>,
        config: &BanditConfig,
    ) -> StorageResult<Self> {
        let stats = apply_outcome(&self.stats, outcome, now.timestamp_millis(), config)?;
        Ok(Self {
            stats,
            updated_at: next_updated_at(self.updated_at, now),
            is_synced: false,
            ..self.clone()
        })
    }

    /// 同步整体替换：身份必须一致，统计量必须通过校验
    pub fn apply_full_state(&self, incoming: &QuestionArm) -> StorageResult<Self> {
        if incoming.user_id != self.user_id || incoming.question_id != self.question_id {
            return Err(StorageError::InvalidState(BanditError::InvalidState(format!(
                "身份不匹配: {}/{} <- {}/{}",
                self.user_id, self.question_id, incoming.user_id, incoming.question_id
            ))));
        }
        let stats = apply_full_state(&self.stats, incoming.stats.clone())?;
        Ok(Self {
            stats,
            ..incoming.clone()
        })
    }

    pub fn last_attempted_at(&self) -> Option<DateTime<Utc>> {
        self.stats.last_attempted_at.map(from_millis)
    }
}

impl ArmRecord for QuestionArm {
    const TABLE: &'static str = "question_arm";
    const KEY_COLUMN: &'static str = "question_id";

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn subject_key(&self) -> &str {
        &self.question_id
    }

    fn stats(&self) -> &ArmStats {
        &self.stats
    }

    fn prior(&self) -> BetaParams {
        initial_prior(self.difficulty)
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_synced(&self) -> bool {
        self.is_synced
    }

    fn mark_synced(&mut self, synced_at: DateTime<Utc>) {
        self.is_synced = true;
        self.synced_at = Some(synced_at);
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get("user_id")?,
            question_id: row.get("question_id")?,
            difficulty: Difficulty::parse_or_default(&row.get::<_, String>("difficulty")?),
            stats: stats_from_row(row)?,
            created_at: from_millis(row.get("created_at")?),
            updated_at: from_millis(row.get("updated_at")?),
            is_synced: row.get::<_, i32>("is_synced")? != 0,
            synced_at: row.get::<_, Option<i64>>("synced_at")?.map(from_millis),
        })
    }

    fn upsert(&self, conn: &Connection) -> StorageResult<()> {
        conn.execute(
            r#"
            INSERT INTO question_arm (
                user_id, question_id, difficulty,
                attempts, successes, failures, total_response_time_ms, user_confidence,
                alpha, beta, last_attempted_at,
                created_at, updated_at, is_synced, synced_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15
            )
            ON CONFLICT(user_id, question_id) DO UPDATE SET
                difficulty = excluded.difficulty,
                attempts = excluded.attempts,
                successes = excluded.successes,
                failures = excluded.failures,
                total_response_time_ms = excluded.total_response_time_ms,
                user_confidence = excluded.user_confidence,
                alpha = excluded.alpha,
                beta = excluded.beta,
                last_attempted_at = excluded.last_attempted_at,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                is_synced = excluded.is_synced,
                synced_at = excluded.synced_at
            "#,
            params![
                self.user_id,
                self.question_id,
                self.difficulty.as_str(),
                self.stats.attempts,
                self.stats.successes,
                self.stats.failures,
                self.stats.total_response_time_ms,
                self.stats.user_confidence,
                self.stats.alpha,
                self.stats.beta,
                self.stats.last_attempted_at,
                self.created_at.timestamp_millis(),
                self.updated_at.timestamp_millis(),
                self.is_synced as i32,
                self.synced_at.map(|t| t.timestamp_millis()),
            ],
        )?;
        Ok(())
    }
}

// ============================================================
// TopicArm - 主题臂
// ============================================================

/// 用户 × 主题 的臂，主题键格式为 `topic_knowledgeType`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicArm {
    pub user_id: String,
    pub topic_key: String,
    pub course: String,
    pub topic: String,
    pub knowledge_type: String,
    pub stats: ArmStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
}

impl TopicArm {
    pub fn make_key(topic: &str, knowledge_type: &str) -> String {
        format!("{}_{}", topic, knowledge_type)
    }

    /// 由无信息先验 Beta(1, 1) 创建新臂
    pub fn seeded(
        user_id: impl Into<String>,
        topic_key: impl Into<String>,
        course: impl Into<String>,
        topic: impl Into<String>,
        knowledge_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            topic_key: topic_key.into(),
            course: course.into(),
            topic: topic.into(),
            knowledge_type: knowledge_type.into(),
            stats: ArmStats::from_prior(topic_prior(None)),
            created_at: now,
            updated_at: now,
            is_synced: false,
            synced_at: None,
        }
    }

    pub fn apply_outcome(
        &self,
        outcome: &Outcome,
        now: DateTime<Utc>,
        config: &BanditConfig,
    ) -> StorageResult<Self> {
        let stats = apply_outcome(&self.stats, outcome, now.timestamp_millis(), config)?;
        Ok(Self {
            stats,
            updated_at: next_updated_at(self.updated_at, now),
            is_synced: false,
            ..self.clone()
        })
    }

    pub fn apply_full_state(&self, incoming: &TopicArm) -> StorageResult<Self> {
        if incoming.user_id != self.user_id || incoming.topic_key != self.topic_key {
            return Err(StorageError::InvalidState(BanditError::InvalidState(format!(
                "身份不匹配: {}/{} <- {}/{}",
                self.user_id, self.topic_key, incoming.user_id, incoming.topic_key
            ))));
        }
        let stats = apply_full_state(&self.stats, incoming.stats.clone())?;
        Ok(Self {
            stats,
            ..incoming.clone()
        })
    }
}

impl ArmRecord for TopicArm {
    const TABLE: &'static str = "topic_arm";
    const KEY_COLUMN: &'static str = "topic_key";

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn subject_key(&self) -> &str {
        &self.topic_key
    }

    fn stats(&self) -> &ArmStats {
        &self.stats
    }

    fn prior(&self) -> BetaParams {
        topic_prior(None)
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_synced(&self) -> bool {
        self.is_synced
    }

    fn mark_synced(&mut self, synced_at: DateTime<Utc>) {
        self.is_synced = true;
        self.synced_at = Some(synced_at);
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get("user_id")?,
            topic_key: row.get("topic_key")?,
            course: row.get("course")?,
            topic: row.get("topic")?,
            knowledge_type: row.get("knowledge_type")?,
            stats: stats_from_row(row)?,
            created_at: from_millis(row.get("created_at")?),
            updated_at: from_millis(row.get("updated_at")?),
            is_synced: row.get::<_, i32>("is_synced")? != 0,
            synced_at: row.get::<_, Option<i64>>("synced_at")?.map(from_millis),
        })
    }

    fn upsert(&self, conn: &Connection) -> StorageResult<()> {
        conn.execute(
            r#"
            INSERT INTO topic_arm (
                user_id, topic_key, course, topic, knowledge_type,
                attempts, successes, failures, total_response_time_ms, user_confidence,
                alpha, beta, last_attempted_at,
                created_at, updated_at, is_synced, synced_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17
            )
            ON CONFLICT(user_id, topic_key) DO UPDATE SET
                course = excluded.course,
                topic = excluded.topic,
                knowledge_type = excluded.knowledge_type,
                attempts = excluded.attempts,
                successes = excluded.successes,
                failures = excluded.failures,
                total_response_time_ms = excluded.total_response_time_ms,
                user_confidence = excluded.user_confidence,
                alpha = excluded.alpha,
                beta = excluded.beta,
                last_attempted_at = excluded.last_attempted_at,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                is_synced = excluded.is_synced,
                synced_at = excluded.synced_at
            "#,
            params![
                self.user_id,
                self.topic_key,
                self.course,
                self.topic,
                self.knowledge_type,
                self.stats.attempts,
                self.stats.successes,
                self.stats.failures,
                self.stats.total_response_time_ms,
                self.stats.user_confidence,
                self.stats.alpha,
                self.stats.beta,
                self.stats.last_attempted_at,
                self.created_at.timestamp_millis(),
                self.updated_at.timestamp_millis(),
                self.is_synced as i32,
                self.synced_at.map(|t| t.timestamp_millis()),
            ],
        )?;
        Ok(())
    }
}

// ============================================================
// 测试
// ============================================================
