//! SQLite 离线存储模块
//!
//! 提供本地 SQLite 数据库存储功能，支持：
//! - 题目臂与主题臂统计量的本地持久化
//! - 增量同步所需的按时间查询
//! - 按用户保存上次同步时间

// ============================================================
// 子模块声明
// ============================================================

pub mod arm_store;
pub mod migrations;
pub mod models;

// ============================================================
// 重新导出主要类型
// ============================================================

pub use arm_store::{ArmRepository, MergeCounts};
pub use migrations::run_migrations;
pub use models::{ArmRecord, QuestionArm, TopicArm};

// ============================================================
// 依赖导入
// ============================================================

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use quizmab_algo::BanditError;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::info;

use crate::sync::PhaseMap;

// ============================================================
// 错误类型定义
// ============================================================

/// 存储模块错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("迁移错误: {0}")]
    Migration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("锁获取失败: {0}")]
    LockError(String),

    /// 记录违反臂不变量，未写入
    #[error("无效状态: {0}")]
    InvalidState(#[from] BanditError),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// 上次同步时间在 sync_metadata 中的键前缀
const LAST_SYNC_KEY_PREFIX: &str = "last_sync_time:";

fn last_sync_key(user_id: &str) -> String {
    format!("{}{}", LAST_SYNC_KEY_PREFIX, user_id)
}

/// 按用户删除的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletedCounts {
    pub question_arms: usize,
    pub topic_arms: usize,
}

// ============================================================
// Storage - 统一存储结构体
// ============================================================

/// 统一存储结构体
///
/// 持有共享连接，按需创建各个仓储。
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
    sync_phases: Arc<PhaseMap>,
}

impl Storage {
    /// 打开（或创建）数据库文件
    ///
    /// 启用 WAL 模式并运行迁移。
    pub fn new<P: AsRef<Path>>(db_path: P) -> StorageResult<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();
        let connection = Connection::open(&db_path)?;

        // 启用 WAL 模式以提高并发性能
        connection.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;

        Self::with_connection(connection, path_str)
    }

    /// 创建内存数据库（用于测试）
    pub fn in_memory() -> StorageResult<Self> {
        let connection = Connection::open_in_memory()?;
        connection.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::with_connection(connection, ":memory:".to_string())
    }

    fn with_connection(connection: Connection, db_path: String) -> StorageResult<Self> {
        let version = run_migrations(&connection)?;
        info!(db_path = %db_path, schema_version = version, "数据库已打开");

        Ok(Self {
            conn: Arc::new(Mutex::new(connection)),
            db_path,
            sync_phases: Arc::new(PhaseMap::default()),
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// 同步周期登记表，克隆出的 Storage 共用同一份
    pub(crate) fn sync_phases(&self) -> &PhaseMap {
        &self.sync_phases
    }

    fn get_connection(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }

    /// 题目臂仓储
    pub fn question_arms(&self) -> ArmRepository<QuestionArm> {
        ArmRepository::new(Arc::clone(&self.conn))
    }

    /// 主题臂仓储
    pub fn topic_arms(&self) -> ArmRepository<TopicArm> {
        ArmRepository::new(Arc::clone(&self.conn))
    }

    /// 执行事务
    pub fn transaction<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    // ========== 同步元数据操作 ==========

    pub fn get_sync_metadata(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.get_connection()?;
        let value = conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_sync_metadata(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO sync_metadata (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    /// 用户上次成功同步的服务器时间（毫秒），从未同步为 0
    pub fn last_sync_time(&self, user_id: &str) -> StorageResult<i64> {
        match self.get_sync_metadata(&last_sync_key(user_id))? {
            Some(value) => value.parse::<i64>().map_err(|e| {
                StorageError::Serialization(format!("解析同步时间失败: {} ({})", value, e))
            }),
            None => Ok(0),
        }
    }

    pub fn set_last_sync_time(&self, user_id: &str, server_time_ms: i64) -> StorageResult<()> {
        self.set_sync_metadata(&last_sync_key(user_id), &server_time_ms.to_string())
    }

    /// 重置为 epoch，下次同步将上传并接收完整历史
    pub fn reset_last_sync_time(&self, user_id: &str) -> StorageResult<()> {
        self.set_last_sync_time(user_id, 0)
    }

    // ========== 用户数据重置 ==========

    /// 在一个事务中删除用户的全部臂与同步元数据
    pub fn delete_all_for_user(&self, user_id: &str) -> StorageResult<DeletedCounts> {
        let counts = self.transaction(|conn| {
            let question_arms = arm_store::delete_on::<QuestionArm>(conn, user_id)?;
            let topic_arms = arm_store::delete_on::<TopicArm>(conn, user_id)?;
            conn.execute(
                "DELETE FROM sync_metadata WHERE key = ?1",
                [last_sync_key(user_id)],
            )?;
            Ok(DeletedCounts {
                question_arms,
                topic_arms,
            })
        })?;

        info!(
            user_id,
            question_arms = counts.question_arms,
            topic_arms = counts.topic_arms,
            "已删除用户数据"
        );
        Ok(counts)
    }
}

// ============================================================
// 测试
// ============================================================
