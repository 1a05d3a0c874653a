use quizmab_algo::BanditError;
use thiserror::Error;

use crate::storage::StorageError;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Bandit(#[from] BanditError),

    /// 内容目录中不存在该题目
    #[error("未知题目: {0}")]
    UnknownQuestion(String),

    /// 所有操作都必须显式指定用户
    #[error("缺少 user_id")]
    MissingUserId,

    /// 同一用户的同步正在进行，重入调用被拒绝
    #[error("用户 {user_id} 的同步正在进行")]
    SyncInProgress { user_id: String },

    #[error("配置错误: {0}")]
    Config(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
