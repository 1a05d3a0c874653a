//! 同步传输层
//!
//! 线上格式：`POST {base}/sync/mab`，请求与响应中的时间戳均为毫秒 epoch 整数。
//! 载荷只含臂的业务字段，不含本地同步标记。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use quizmab_algo::{ArmStats, Difficulty, INITIAL_CONFIDENCE};

use crate::storage::models::from_millis;
use crate::storage::{QuestionArm, TopicArm};

// ============================================================
// 错误类型
// ============================================================

/// 传输失败；只作为同步结果的一部分返回，不会推进 lastSyncTime
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncTransportError {
    #[error("网络错误: {0}")]
    Network(String),

    #[error("同步超时 ({0:?})")]
    Timeout(Duration),

    #[error("服务器返回 HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("响应解析失败: {0}")]
    Parse(String),
}

// ============================================================
// 线上载荷
// ============================================================

fn default_confidence() -> f64 {
    INITIAL_CONFIDENCE
}

/// 题目臂载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionArmPayload {
    pub question_id: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub attempts: i64,
    pub successes: i64,
    pub failures: i64,
    pub total_response_time_ms: i64,
    pub alpha: f64,
    pub beta: f64,
    #[serde(default = "default_confidence")]
    pub user_confidence: f64,
    #[serde(default)]
    pub last_attempted: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl QuestionArmPayload {
    pub fn from_arm(arm: &QuestionArm) -> Self {
        Self {
            question_id: arm.question_id.clone(),
            difficulty: arm.difficulty,
            attempts: arm.stats.attempts,
            successes: arm.stats.successes,
            failures: arm.stats.failures,
            total_response_time_ms: arm.stats.total_response_time_ms,
            alpha: arm.stats.alpha,
            beta: arm.stats.beta,
            user_confidence: arm.stats.user_confidence,
            last_attempted: arm.stats.last_attempted_at,
            created_at: arm.created_at.timestamp_millis(),
            updated_at: arm.updated_at.timestamp_millis(),
        }
    }

    /// 载荷不携带用户，由调用方指定
    pub fn into_arm(self, user_id: &str) -> QuestionArm {
        QuestionArm {
            user_id: user_id.to_string(),
            question_id: self.question_id,
            difficulty: self.difficulty,
            stats: ArmStats {
                attempts: self.attempts,
                successes: self.successes,
                failures: self.failures,
                total_response_time_ms: self.total_response_time_ms,
                user_confidence: self.user_confidence,
                alpha: self.alpha,
                beta: self.beta,
                last_attempted_at: self.last_attempted,
            },
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
            is_synced: false,
            synced_at: None,
        }
    }
}

/// 主题臂载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicArmPayload {
    pub topic_key: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub knowledge_type: String,
    #[serde(default)]
    pub course: String,
    pub attempts: i64,
    pub successes: i64,
    pub failures: i64,
    pub total_response_time_ms: i64,
    pub alpha: f64,
    pub beta: f64,
    #[serde(default = "default_confidence")]
    pub user_confidence: f64,
    #[serde(default)]
    pub last_attempted: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TopicArmPayload {
    pub fn from_arm(arm: &TopicArm) -> Self {
        Self {
            topic_key: arm.topic_key.clone(),
            topic: arm.topic.clone(),
            knowledge_type: arm.knowledge_type.clone(),
            course: arm.course.clone(),
            attempts: arm.stats.attempts,
            successes: arm.stats.successes,
            failures: arm.stats.failures,
            total_response_time_ms: arm.stats.total_response_time_ms,
            alpha: arm.stats.alpha,
            beta: arm.stats.beta,
            user_confidence: arm.stats.user_confidence,
            last_attempted: arm.stats.last_attempted_at,
            created_at: arm.created_at.timestamp_millis(),
            updated_at: arm.updated_at.timestamp_millis(),
        }
    }

    pub fn into_arm(self, user_id: &str) -> TopicArm {
        TopicArm {
            user_id: user_id.to_string(),
            topic_key: self.topic_key,
            course: self.course,
            topic: self.topic,
            knowledge_type: self.knowledge_type,
            stats: ArmStats {
                attempts: self.attempts,
                successes: self.successes,
                failures: self.failures,
                total_response_time_ms: self.total_response_time_ms,
                user_confidence: self.user_confidence,
                alpha: self.alpha,
                beta: self.beta,
                last_attempted_at: self.last_attempted,
            },
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
            is_synced: false,
            synced_at: None,
        }
    }
}

/// 同步请求
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// 客户端上次成功同步的服务器时间
    pub last_sync_time: i64,
    #[serde(default)]
    pub question_arms: Vec<QuestionArmPayload>,
    #[serde(default)]
    pub topic_arms: Vec<TopicArmPayload>,
}

/// 同步响应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// 下次请求使用的 lastSyncTime
    pub server_time: i64,
    #[serde(default)]
    pub question_arms: Vec<QuestionArmPayload>,
    #[serde(default)]
    pub topic_arms: Vec<TopicArmPayload>,
    #[serde(default)]
    pub conflicts_resolved: usize,
}

// ============================================================
// 传输接口
// ============================================================

/// 与远端权威交换增量
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn exchange(
        &self,
        user_id: &str,
        request: SyncRequest,
    ) -> Result<SyncResponse, SyncTransportError>;
}

/// 基于 reqwest 的 HTTP 传输
pub struct HttpSyncTransport {
    client: Client,
    api_base_url: String,
    auth_token: String,
    timeout: Duration,
}

impl HttpSyncTransport {
    pub fn new(
        api_base_url: impl Into<String>,
        auth_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SyncTransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncTransportError::Network(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.into(),
            timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/sync/mab", self.api_base_url)
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn exchange(
        &self,
        user_id: &str,
        request: SyncRequest,
    ) -> Result<SyncResponse, SyncTransportError> {
        tracing::debug!(
            user_id,
            url = %self.endpoint(),
            question_arms = request.question_arms.len(),
            topic_arms = request.topic_arms.len(),
            "发送同步请求"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.auth_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncTransportError::Timeout(self.timeout)
                } else {
                    SyncTransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncTransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<SyncResponse>()
            .await
            .map_err(|e| SyncTransportError::Parse(e.to_string()))
    }
}
