//! 臂存储仓储
//!
//! 题目臂与主题臂共用一套按 (user_id, 主体键) 寻址的操作。
//! `list_modified_since` 是同步上传增量的唯一来源。

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::storage::models::ArmRecord;
use crate::storage::{StorageError, StorageResult};

/// LWW 合并结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    /// 覆盖或新建的记录数
    pub applied: usize,
    /// 因不比本地新而丢弃的记录数
    pub stale: usize,
}

/// 臂记录仓储
pub struct ArmRepository<A: ArmRecord> {
    conn: Arc<Mutex<Connection>>,
    _record: PhantomData<A>,
}

impl<A: ArmRecord> ArmRepository<A> {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            _record: PhantomData,
        }
    }

    fn get_connection(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockError(e.to_string()))
    }

    // ========== 基本 CRUD 操作 ==========

    /// 获取单条记录
    pub fn get(&self, user_id: &str, key: &str) -> StorageResult<Option<A>> {
        let conn = self.get_connection()?;
        get_on(&conn, user_id, key)
    }

    /// 插入或整体替换，写入前校验不变量
    pub fn put(&self, arm: &A) -> StorageResult<()> {
        arm.validate()?;
        let conn = self.get_connection()?;
        arm.upsert(&conn)
    }

    /// 在一个事务中写入多条记录；任一记录无效则全部不写
    pub fn put_batch(&self, arms: &[A]) -> StorageResult<usize> {
        for arm in arms {
            arm.validate()?;
        }

        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        for arm in arms {
            arm.upsert(&tx)?;
        }
        tx.commit()?;

        Ok(arms.len())
    }

    /// 用户的全部记录，按主体键排序
    pub fn list_by_user(&self, user_id: &str) -> StorageResult<Vec<A>> {
        let conn = self.get_connection()?;
        let sql = format!(
            "SELECT * FROM {} WHERE user_id = ?1 ORDER BY {}",
            A::TABLE,
            A::KEY_COLUMN
        );

        let mut stmt = conn.prepare(&sql)?;
        let arms = stmt
            .query_map(params![user_id], |row| A::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(arms)
    }

    /// 待上传的记录：updated_at 严格大于 `since_ms`，或尚未同步，按 updated_at 升序
    ///
    /// `since_ms` 是服务器时间，本地时钟落后时新记录的 updated_at 可能不大于它，
    /// 因此未同步的记录总是包含在内。
    pub fn list_modified_since(&self, user_id: &str, since_ms: i64) -> StorageResult<Vec<A>> {
        let conn = self.get_connection()?;
        let sql = format!(
            "SELECT * FROM {} WHERE user_id = ?1 AND (updated_at > ?2 OR is_synced = 0)
             ORDER BY updated_at, {}",
            A::TABLE,
            A::KEY_COLUMN
        );

        let mut stmt = conn.prepare(&sql)?;
        let arms = stmt
            .query_map(params![user_id, since_ms], |row| A::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(arms)
    }

    pub fn delete_all_for_user(&self, user_id: &str) -> StorageResult<usize> {
        let conn = self.get_connection()?;
        delete_on::<A>(&conn, user_id)
    }

    // ========== 统计 ==========

    pub fn count_by_user(&self, user_id: &str) -> StorageResult<i64> {
        let conn = self.get_connection()?;
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE user_id = ?1", A::TABLE),
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 尚未同步的记录数
    pub fn count_pending(&self, user_id: &str) -> StorageResult<i64> {
        let conn = self.get_connection()?;
        let count = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE user_id = ?1 AND is_synced = 0",
                A::TABLE
            ),
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ========== 同步支持 ==========

    /// 标记已上传的记录为已同步
    ///
    /// 仅当 updated_at 与上传时一致才标记，上传后又被修改的记录保持未同步。
    pub fn mark_synced(
        &self,
        user_id: &str,
        uploaded: &[A],
        synced_at: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        let sql = format!(
            "UPDATE {} SET is_synced = 1, synced_at = ?1
             WHERE user_id = ?2 AND {} = ?3 AND updated_at = ?4",
            A::TABLE,
            A::KEY_COLUMN
        );

        let mut marked = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for arm in uploaded {
                marked += stmt.execute(params![
                    synced_at.timestamp_millis(),
                    user_id,
                    arm.subject_key(),
                    arm.updated_at().timestamp_millis(),
                ])?;
            }
        }
        tx.commit()?;

        Ok(marked)
    }

    /// 最后写入优先合并
    ///
    /// 在同一事务中逐条比较 updated_at：传入记录严格更新（或本地不存在）时整体替换，
    /// 否则丢弃。写入的记录标记为已同步。调用方需先过滤掉无效记录。
    pub fn merge_newer(
        &self,
        user_id: &str,
        incoming: &[A],
        synced_at: DateTime<Utc>,
        replace: impl Fn(&A, &A) -> StorageResult<A>,
    ) -> StorageResult<MergeCounts> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        let mut counts = MergeCounts::default();

        for arm in incoming {
            if arm.user_id() != user_id {
                return Err(StorageError::InvalidState(quizmab_algo::BanditError::InvalidState(
                    format!("记录属于用户 {}，而非 {}", arm.user_id(), user_id),
                )));
            }

            let local = get_on::<A>(&tx, user_id, arm.subject_key())?;
            if !arm.supersedes(local.as_ref()) {
                counts.stale += 1;
                continue;
            }

            let mut next = match &local {
                Some(local) => replace(local, arm)?,
                None => {
                    arm.validate()?;
                    arm.clone()
                }
            };
            next.mark_synced(synced_at);
            next.upsert(&tx)?;
            counts.applied += 1;
        }

        tx.commit()?;
        Ok(counts)
    }
}

impl<A: ArmRecord> Clone for ArmRepository<A> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.conn))
    }
}

fn get_on<A: ArmRecord>(conn: &Connection, user_id: &str, key: &str) -> StorageResult<Option<A>> {
    let sql = format!(
        "SELECT * FROM {} WHERE user_id = ?1 AND {} = ?2",
        A::TABLE,
        A::KEY_COLUMN
    );
    let arm = conn
        .query_row(&sql, params![user_id, key], |row| A::from_row(row))
        .optional()?;
    Ok(arm)
}

pub(crate) fn delete_on<A: ArmRecord>(conn: &Connection, user_id: &str) -> StorageResult<usize> {
    let affected = conn.execute(
        &format!("DELETE FROM {} WHERE user_id = ?1", A::TABLE),
        params![user_id],
    )?;
    Ok(affected)
}

// ============================================================
// 单元测试
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{from_millis, QuestionArm, TopicArm};
    use crate::storage::Storage;
    use chrono::Duration;
    use quizmab_algo::{BanditConfig, Difficulty, Outcome};

    const T0: i64 = 1_700_000_000_000;

    fn setup() -> Storage {
        Storage::in_memory().expect("Failed to create in-memory storage")
    }

    fn answered(user: &str, question: &str, at_ms: i64) -> QuestionArm {
        QuestionArm::seeded(user, question, Difficulty::Beginner, from_millis(at_ms))
            .apply_outcome(
                &Outcome::new(true, 3_000, 8_000),
                from_millis(at_ms),
                &BanditConfig::default(),
            )
            .expect("Failed to apply outcome")
    }

    #[test]
    fn test_put_and_get() {
        let repo = setup().question_arms();
        let arm = answered("user-1", "q-1", T0);
        repo.put(&arm).expect("Failed to put");

        let loaded = repo.get("user-1", "q-1").expect("Failed to get").unwrap();
        assert_eq!(loaded, arm);
        assert!(repo.get("user-1", "missing").unwrap().is_none());
        assert!(repo.get("user-2", "q-1").unwrap().is_none());
    }

    #[test]
    fn test_put_is_upsert() {
        let repo = setup().question_arms();
        let arm = answered("user-1", "q-1", T0);
        repo.put(&arm).unwrap();

        let next = arm
            .apply_outcome(
                &Outcome::new(false, 9_000, 8_000),
                from_millis(T0 + 1_000),
                &BanditConfig::default(),
            )
            .unwrap();
        repo.put(&next).unwrap();

        assert_eq!(repo.count_by_user("user-1").unwrap(), 1);
        assert_eq!(repo.get("user-1", "q-1").unwrap().unwrap().stats.attempts, 2);
    }

    #[test]
    fn test_put_rejects_invalid_before_write() {
        let repo = setup().question_arms();
        let mut arm = answered("user-1", "q-1", T0);
        arm.stats.successes = 5;

        assert!(matches!(repo.put(&arm), Err(StorageError::InvalidState(_))));
        assert_eq!(repo.count_by_user("user-1").unwrap(), 0);
    }

    #[test]
    fn test_put_batch_is_all_or_nothing() {
        let repo = setup().question_arms();
        let good = answered("user-1", "q-1", T0);
        let mut bad = answered("user-1", "q-2", T0);
        bad.stats.alpha = 0.0;

        assert!(repo.put_batch(&[good.clone(), bad]).is_err());
        assert_eq!(repo.count_by_user("user-1").unwrap(), 0);

        let second = answered("user-1", "q-2", T0);
        assert_eq!(repo.put_batch(&[good, second]).unwrap(), 2);
        assert_eq!(repo.count_by_user("user-1").unwrap(), 2);
    }

    #[test]
    fn test_list_modified_since_is_strict_for_synced_arms() {
        let repo = setup().question_arms();
        let a = answered("user-1", "q-a", T0);
        let b = answered("user-1", "q-b", T0 + 10_000);
        repo.put_batch(&[a.clone(), b.clone()]).unwrap();
        repo.mark_synced("user-1", &[a.clone(), b.clone()], from_millis(T0 + 20_000))
            .unwrap();

        let all = repo.list_modified_since("user-1", 0).unwrap();
        assert_eq!(all.len(), 2);

        let at_a = repo
            .list_modified_since("user-1", a.updated_at.timestamp_millis())
            .unwrap();
        assert_eq!(at_a.len(), 1);
        assert_eq!(at_a[0].question_id, "q-b");

        let none = repo
            .list_modified_since("user-1", b.updated_at.timestamp_millis())
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_list_modified_since_includes_pending_behind_watermark() {
        let repo = setup().question_arms();
        let synced = answered("user-1", "q-a", T0);
        repo.put(&synced).unwrap();
        repo.mark_synced("user-1", &[synced], from_millis(T0 + 10_000))
            .unwrap();

        // 本地时钟落后于服务器：新记录的 updated_at 小于水位
        let behind = answered("user-1", "q-b", T0 + 5_000);
        repo.put(&behind).unwrap();

        let delta = repo.list_modified_since("user-1", T0 + 10_000).unwrap();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].question_id, "q-b");
    }

    #[test]
    fn test_users_are_isolated() {
        let repo = setup().question_arms();
        repo.put(&answered("user-1", "q-1", T0)).unwrap();
        repo.put(&answered("user-2", "q-1", T0)).unwrap();

        assert_eq!(repo.list_by_user("user-1").unwrap().len(), 1);
        assert_eq!(repo.delete_all_for_user("user-1").unwrap(), 1);
        assert_eq!(repo.count_by_user("user-1").unwrap(), 0);
        assert_eq!(repo.count_by_user("user-2").unwrap(), 1);
    }

    #[test]
    fn test_mark_synced_skips_moved_records() {
        let repo = setup().question_arms();
        let arm = answered("user-1", "q-1", T0);
        let other = answered("user-1", "q-2", T0);
        repo.put_batch(&[arm.clone(), other.clone()]).unwrap();
        assert_eq!(repo.count_pending("user-1").unwrap(), 2);

        // q-2 在上传后又被作答
        let moved = other
            .apply_outcome(
                &Outcome::new(true, 1_000, 8_000),
                from_millis(T0 + 5_000),
                &BanditConfig::default(),
            )
            .unwrap();
        repo.put(&moved).unwrap();

        let marked = repo
            .mark_synced("user-1", &[arm, other], from_millis(T0 + 6_000))
            .unwrap();
        assert_eq!(marked, 1);
        assert_eq!(repo.count_pending("user-1").unwrap(), 1);

        let synced = repo.get("user-1", "q-1").unwrap().unwrap();
        assert!(synced.is_synced);
        assert_eq!(synced.synced_at, Some(from_millis(T0 + 6_000)));
    }

    #[test]
    fn test_merge_newer_is_last_write_wins() {
        let repo = setup().question_arms();
        let local = answered("user-1", "q-1", T0);
        repo.put(&local).unwrap();

        let mut older = local.clone();
        older.updated_at = local.updated_at - Duration::seconds(1);
        older.stats.attempts = 0;
        older.stats.successes = 0;

        let mut newer = local.clone();
        newer.updated_at = local.updated_at + Duration::seconds(1);
        newer.stats.attempts = 4;
        newer.stats.successes = 3;
        newer.stats.failures = 1;

        let fresh = answered("user-1", "q-2", T0);
        let replace = |l: &QuestionArm, i: &QuestionArm| l.apply_full_state(i);
        let synced_at = from_millis(T0 + 60_000);

        let counts = repo
            .merge_newer("user-1", &[older, local.clone(), newer.clone(), fresh], synced_at, replace)
            .unwrap();
        assert_eq!(counts, MergeCounts { applied: 2, stale: 2 });

        let stored = repo.get("user-1", "q-1").unwrap().unwrap();
        assert_eq!(stored.stats, newer.stats);
        assert_eq!(stored.updated_at, newer.updated_at);
        assert!(stored.is_synced);

        // 重复应用同一增量不再改变状态
        let again = repo
            .merge_newer("user-1", &[newer], synced_at, replace)
            .unwrap();
        assert_eq!(again, MergeCounts { applied: 0, stale: 1 });
        assert_eq!(repo.get("user-1", "q-1").unwrap().unwrap(), stored);
    }

    #[test]
    fn test_topic_repository() {
        let repo = setup().topic_arms();
        let arm = TopicArm::seeded("user-1", "renal_dosage", "pharm", "renal", "dosage", from_millis(T0));
        repo.put(&arm).unwrap();

        let loaded = repo.get("user-1", "renal_dosage").unwrap().unwrap();
        assert_eq!(loaded.course, "pharm");
        assert_eq!(loaded.knowledge_type, "dosage");
        assert_eq!(repo.list_modified_since("user-1", 0).unwrap().len(), 1);
    }
}
