//! # QuizMAB Engine
//!
//! 离线优先的自适应测验引擎：
//! - SQLite 本地存储题目臂与主题臂
//! - 与远端权威的增量同步（最后写入优先）
//! - 层级 Thompson 采样选题
//!
//! ## 示例
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use quizmab_engine::{EngineConfig, QuizService, StaticCatalog, Storage};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let storage = Storage::new(&config.db_path)?;
//! let service = QuizService::new(storage, StaticCatalog::new(), &config);
//!
//! let session = service.start_session("user-1", Utc::now())?;
//! let next = service.request_next_question(&session, Utc::now())?;
//! println!("{:?}", next.question_id());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod service;
pub mod storage;
pub mod sync;

pub use config::{EngineConfig, LogConfig};
pub use error::{EngineError, EngineResult};
pub use logging::{init_tracing, FileLogGuard};
pub use service::{
    AnswerRecord, ContentCatalog, QuestionMeta, QuizService, QuizSession, StaticCatalog,
    TopicMeta,
};
pub use storage::{DeletedCounts, QuestionArm, Storage, StorageError, TopicArm};
pub use sync::{
    HttpSyncTransport, SyncEngine, SyncPhase, SyncReport, SyncRequest, SyncResponse, SyncStatus,
    SyncTransport, SyncTransportError,
};
