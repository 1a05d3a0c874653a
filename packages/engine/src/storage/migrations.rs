//! 数据库迁移模块
//!
//! 按版本号顺序执行建表与索引脚本，已应用的版本记录在 schema_migrations 表中。
//! 每个迁移在独立事务中执行，失败时回滚该迁移并中止。

use rusqlite::Connection;
use tracing::{error, info};

use crate::storage::{StorageError, StorageResult};

/// 当前数据库 schema 版本
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// 迁移记录
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub sql: &'static str,
}

impl Migration {
    pub const fn new(version: i32, name: &'static str, sql: &'static str) -> Self {
        Self { version, name, sql }
    }
}

/// 按版本号排序的全部迁移
pub fn get_migrations() -> Vec<Migration> {
    vec![
        // V1: 臂统计表与同步元数据
        Migration::new(
            1,
            "臂统计表与同步元数据",
            r#"
            CREATE TABLE IF NOT EXISTS question_arm (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                question_id TEXT NOT NULL,
                difficulty TEXT NOT NULL DEFAULT 'intermediate',
                attempts INTEGER NOT NULL DEFAULT 0,
                successes INTEGER NOT NULL DEFAULT 0,
                failures INTEGER NOT NULL DEFAULT 0,
                total_response_time_ms INTEGER NOT NULL DEFAULT 0,
                user_confidence REAL NOT NULL DEFAULT 0.5,
                alpha REAL NOT NULL CHECK (alpha > 0),
                beta REAL NOT NULL CHECK (beta > 0),
                last_attempted_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                is_synced INTEGER NOT NULL DEFAULT 0,
                synced_at INTEGER,
                UNIQUE (user_id, question_id)
            );

            CREATE TABLE IF NOT EXISTS topic_arm (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                topic_key TEXT NOT NULL,
                course TEXT NOT NULL DEFAULT '',
                topic TEXT NOT NULL DEFAULT '',
                knowledge_type TEXT NOT NULL DEFAULT '',
                attempts INTEGER NOT NULL DEFAULT 0,
                successes INTEGER NOT NULL DEFAULT 0,
                failures INTEGER NOT NULL DEFAULT 0,
                total_response_time_ms INTEGER NOT NULL DEFAULT 0,
                user_confidence REAL NOT NULL DEFAULT 0.5,
                alpha REAL NOT NULL CHECK (alpha > 0),
                beta REAL NOT NULL CHECK (beta > 0),
                last_attempted_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                is_synced INTEGER NOT NULL DEFAULT 0,
                synced_at INTEGER,
                UNIQUE (user_id, topic_key)
            );

            CREATE TABLE IF NOT EXISTS sync_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        ),
        // V2: 增量同步索引
        Migration::new(
            2,
            "增量同步索引",
            r#"
            CREATE INDEX IF NOT EXISTS idx_question_arm_user_updated
                ON question_arm(user_id, updated_at);

            CREATE INDEX IF NOT EXISTS idx_topic_arm_user_updated
                ON topic_arm(user_id, updated_at);

            CREATE INDEX IF NOT EXISTS idx_question_arm_pending
                ON question_arm(user_id, is_synced);

            CREATE INDEX IF NOT EXISTS idx_topic_arm_pending
                ON topic_arm(user_id, is_synced);
            "#,
        ),
    ]
}

fn ensure_migrations_table(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        );
        "#,
    )
    .map_err(|e| StorageError::Migration(format!("创建迁移表失败: {}", e)))?;

    Ok(())
}

/// 当前数据库版本，没有迁移记录时为 0
pub fn get_current_version(conn: &Connection) -> StorageResult<i32> {
    ensure_migrations_table(conn)?;

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// 运行数据库迁移，返回最终版本号
pub fn run_migrations(conn: &Connection) -> StorageResult<i32> {
    let mut current = get_current_version(conn)?;

    if current < CURRENT_SCHEMA_VERSION {
        info!(current, target = CURRENT_SCHEMA_VERSION, "开始数据库迁移");
    }

    for migration in get_migrations() {
        if migration.version <= current {
            continue;
        }

        info!("运行迁移 v{}: {}", migration.version, migration.name);

        if let Err(e) = execute_migration_in_transaction(conn, &migration) {
            error!("迁移 v{} 失败: {}", migration.version, e);
            return Err(e);
        }
        current = migration.version;
    }

    Ok(current)
}

fn execute_migration_in_transaction(conn: &Connection, migration: &Migration) -> StorageResult<()> {
    conn.execute_batch("BEGIN IMMEDIATE")?;

    let applied = conn.execute_batch(migration.sql).and_then(|_| {
        conn.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                migration.name,
                chrono::Utc::now().timestamp_millis()
            ],
        )
    });

    match applied {
        Ok(_) => {
            conn.execute_batch("COMMIT")?;
            Ok(())
        }
        Err(e) => {
            conn.execute_batch("ROLLBACK").ok();
            Err(StorageError::Migration(format!(
                "迁移 v{} 执行失败: {}",
                migration.version, e
            )))
        }
    }
}
