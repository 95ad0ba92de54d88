//! Per-job SQLite staging store.
//!
//! A disposable mirror of one round's assignments. All bulk reads and
//! writes of a distribution run happen here; only the final reviewer
//! changes are exported back to the primary store.
//!
//! File-backed staging uses WAL mode and is deleted on [`StagingStore::close`].
//! Without a staging directory the database lives in memory on a single
//! pooled connection.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::config::StagingConfig;
use crate::error::Result;
use crate::model::*;
use crate::store::PrimaryStore;

/// An unassigned, unevaluated assignment together with its submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenSlot {
    pub assignment_id: AssignmentId,
    pub work_item_id: WorkItemId,
    pub submitter_id: UserId,
}

/// A reviewer as mirrored in staging, with its current load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedReviewer {
    pub reviewer_id: ReviewerId,
    pub user_id: UserId,
    /// Assignments held, evaluated or not.
    pub load: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportPass {
    /// Clear the primary reviewer of every moved row.
    Vacate,
    /// Write the final reviewer of every row that has one.
    Fill,
}

/// Staging store handle. Owns the SQLite pool for one job; clones share it.
#[derive(Clone)]
pub struct StagingStore {
    pool: SqlitePool,
    path: Option<PathBuf>,
    batch_size: usize,
}

impl StagingStore {
    /// Open a fresh staging database for `job_id`.
    pub async fn open(job_id: JobId, config: &StagingConfig) -> Result<Self> {
        let (options, max_connections, path) = match &config.dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                let path = dir.join(format!("job-{job_id}.sqlite3"));
                if tokio::fs::try_exists(&path).await? {
                    tokio::fs::remove_file(&path).await?;
                }
                let options = SqliteConnectOptions::new()
                    .filename(&path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal);
                (options, 4, Some(path))
            }
            None => (SqliteConnectOptions::from_str("sqlite::memory:")?, 1, None),
        };

        // An in-memory database lives exactly as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            path,
            batch_size: config.batch_size.max(1),
        };
        store.init().await?;
        debug!(job_id = %job_id, file = ?store.path, "staging store opened");
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::raw_sql(
            "
            CREATE TABLE IF NOT EXISTS work_items (
                work_item_id    BLOB PRIMARY KEY,
                submitter_id    BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS reviewers (
                reviewer_id     BLOB PRIMARY KEY,
                user_id         BLOB NOT NULL,
                eligible        INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS assignments (
                assignment_id        BLOB PRIMARY KEY,
                work_item_id         BLOB NOT NULL REFERENCES work_items(work_item_id),
                reviewer_id          BLOB,
                original_reviewer_id BLOB,
                evaluated            INTEGER NOT NULL DEFAULT 0,
                touched              INTEGER NOT NULL DEFAULT 0
            );

            CREATE UNIQUE INDEX IF NOT EXISTS uq_item_reviewer
                ON assignments(work_item_id, reviewer_id);
            CREATE INDEX IF NOT EXISTS idx_assignments_reviewer
                ON assignments(reviewer_id) WHERE reviewer_id IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_assignments_open
                ON assignments(work_item_id) WHERE reviewer_id IS NULL;
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Close the pool and delete the backing file, if any.
    pub async fn close(self) -> Result<()> {
        self.pool.close().await;
        if let Some(path) = &self.path {
            for suffix in ["", "-wal", "-shm"] {
                let file = PathBuf::from(format!("{}{suffix}", path.display()));
                if tokio::fs::try_exists(&file).await? {
                    tokio::fs::remove_file(&file).await?;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Import / export
    // -----------------------------------------------------------------------

    /// Mirror one round from the primary store.
    ///
    /// Reviewers in `eligible` may receive work during this job. Assignments
    /// are copied page by page so memory stays bounded.
    pub async fn import_round<S: PrimaryStore + ?Sized>(
        &self,
        store: &S,
        round_id: RoundId,
        eligible: &HashSet<ReviewerId>,
    ) -> Result<u64> {
        let items = store.list_work_items(round_id).await?;
        for chunk in items.chunks(self.batch_size) {
            let rows: Vec<(WorkItemId, UserId)> =
                chunk.iter().map(|w| (w.id, w.submitter_id)).collect();
            let mut tx = self.pool.begin().await?;
            for (id, submitter) in rows {
                sqlx::query(
                    "INSERT OR REPLACE INTO work_items (work_item_id, submitter_id) VALUES (?1, ?2)",
                )
                .bind(id.0)
                .bind(submitter.0)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
        }

        let reviewers = store.list_reviewers(round_id).await?;
        let rows: Vec<(ReviewerId, UserId, bool)> = reviewers
            .iter()
            .map(|r| (r.id, r.user_id, eligible.contains(&r.id)))
            .collect();
        let mut tx = self.pool.begin().await?;
        for (id, user, eligible) in rows {
            sqlx::query(
                "INSERT OR REPLACE INTO reviewers (reviewer_id, user_id, eligible) VALUES (?1, ?2, ?3)",
            )
            .bind(id.0)
            .bind(user.0)
            .bind(eligible)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let mut imported = 0u64;
        let mut after = None;
        loop {
            let page = store
                .list_assignments(round_id, after, self.batch_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.id);
            imported += page.len() as u64;
            let done = page.len() < self.batch_size;

            let mut tx = self.pool.begin().await?;
            for a in &page {
                sqlx::query(
                    "INSERT OR REPLACE INTO assignments
                        (assignment_id, work_item_id, reviewer_id, original_reviewer_id, evaluated, touched)
                     VALUES (?1, ?2, ?3, ?3, ?4, 0)",
                )
                .bind(a.id.0)
                .bind(a.work_item_id.0)
                .bind(a.reviewer_id.map(|r| r.0))
                .bind(a.is_evaluated())
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;

            if done {
                break;
            }
        }

        info!(
            round_id = %round_id,
            work_items = items.len(),
            reviewers = reviewers.len(),
            assignments = imported,
            "round imported into staging"
        );
        Ok(imported)
    }

    /// Write every reviewer change back to the primary store in batches of
    /// `primary_batch_size`. Returns the number of rows changed.
    ///
    /// Swaps are only valid as a whole, so the write-back runs in two passes:
    /// every moved row is first cleared, then rows with a new reviewer are
    /// filled in. No batch boundary can leave a reviewer holding an item
    /// twice. A run interrupted between the passes leaves cleared rows that
    /// the next run's claim and fallback passes pick up.
    pub async fn export_changes<S: PrimaryStore + ?Sized>(
        &self,
        store: &S,
        job_id: JobId,
        primary_batch_size: usize,
    ) -> Result<u64> {
        let batch = primary_batch_size.max(1);
        let released = self
            .export_pass(store, job_id, batch, ExportPass::Vacate)
            .await?;
        let filled = self
            .export_pass(store, job_id, batch, ExportPass::Fill)
            .await?;
        debug!(job_id = %job_id, released, filled, "staging changes exported");
        Ok(released + filled)
    }

    /// One keyset-paged pass over the changed rows. Returns the number of
    /// rows the pass leaves in their final state.
    async fn export_pass<S: PrimaryStore + ?Sized>(
        &self,
        store: &S,
        job_id: JobId,
        batch: usize,
        pass: ExportPass,
    ) -> Result<u64> {
        let sql = match pass {
            ExportPass::Vacate => {
                "SELECT assignment_id, reviewer_id FROM assignments
                 WHERE reviewer_id IS NOT original_reviewer_id AND original_reviewer_id IS NOT NULL
                   AND (?1 IS NULL OR assignment_id > ?1)
                 ORDER BY assignment_id
                 LIMIT ?2"
            }
            ExportPass::Fill => {
                "SELECT assignment_id, reviewer_id FROM assignments
                 WHERE reviewer_id IS NOT original_reviewer_id AND reviewer_id IS NOT NULL
                   AND (?1 IS NULL OR assignment_id > ?1)
                 ORDER BY assignment_id
                 LIMIT ?2"
            }
        };

        let mut done_rows = 0u64;
        let mut after: Option<AssignmentId> = None;
        loop {
            let rows: Vec<(uuid::Uuid, Option<uuid::Uuid>)> = sqlx::query_as(sql)
                .bind(after.map(|a| a.0))
                .bind(batch as i64)
                .fetch_all(&self.pool)
                .await?;

            let Some((last, _)) = rows.last() else {
                break;
            };
            after = Some(AssignmentId(*last));
            let last_page = rows.len() < batch;

            let changes: Vec<ReviewerChange> = rows
                .iter()
                .map(|&(id, reviewer)| ReviewerChange {
                    assignment_id: AssignmentId(id),
                    reviewer_id: match pass {
                        ExportPass::Vacate => None,
                        ExportPass::Fill => reviewer.map(ReviewerId),
                    },
                    job_id,
                })
                .collect();
            let written = store.update_assignment_reviewers(&changes).await?;
            done_rows += match pass {
                // Cleared rows that get a new reviewer are counted by the fill pass.
                ExportPass::Vacate => rows.iter().filter(|(_, r)| r.is_none()).count() as u64,
                ExportPass::Fill => written,
            };

            if last_page {
                break;
            }
        }
        Ok(done_rows)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Whether any assignment of the round already has a reviewer.
    pub async fn has_history(&self) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM assignments WHERE reviewer_id IS NOT NULL)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Eligible reviewers ordered by ID, with their current total load.
    pub async fn eligible_reviewers(&self) -> Result<Vec<StagedReviewer>> {
        let rows: Vec<(uuid::Uuid, uuid::Uuid, i64)> = sqlx::query_as(
            "SELECT r.reviewer_id, r.user_id,
                    (SELECT COUNT(*) FROM assignments a WHERE a.reviewer_id = r.reviewer_id)
             FROM reviewers r
             WHERE r.eligible = 1
             ORDER BY r.reviewer_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, user, load)| StagedReviewer {
                reviewer_id: ReviewerId(id),
                user_id: UserId(user),
                load: load as u64,
            })
            .collect())
    }

    /// Unevaluated assignments held by each of `reviewers`.
    pub async fn unevaluated_loads(
        &self,
        reviewers: &[ReviewerId],
    ) -> Result<BTreeMap<ReviewerId, u64>> {
        let mut loads = BTreeMap::new();
        for reviewer in reviewers {
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM assignments WHERE reviewer_id = ?1 AND evaluated = 0",
            )
            .bind(reviewer.0)
            .fetch_one(&self.pool)
            .await?;
            loads.insert(*reviewer, count as u64);
        }
        Ok(loads)
    }

    pub async fn user_of(&self, reviewer: ReviewerId) -> Result<Option<UserId>> {
        let row: Option<(uuid::Uuid,)> =
            sqlx::query_as("SELECT user_id FROM reviewers WHERE reviewer_id = ?1")
                .bind(reviewer.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(u,)| UserId(u)))
    }

    pub async fn unassigned_count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM assignments WHERE reviewer_id IS NULL AND evaluated = 0",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    /// Every unassigned slot, ordered by assignment ID.
    pub async fn open_slots(&self) -> Result<Vec<OpenSlot>> {
        let rows: Vec<(uuid::Uuid, uuid::Uuid, uuid::Uuid)> = sqlx::query_as(
            "SELECT a.assignment_id, a.work_item_id, w.submitter_id
             FROM assignments a JOIN work_items w ON w.work_item_id = a.work_item_id
             WHERE a.reviewer_id IS NULL AND a.evaluated = 0
             ORDER BY a.assignment_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, item, submitter)| OpenSlot {
                assignment_id: AssignmentId(id),
                work_item_id: WorkItemId(item),
                submitter_id: UserId(submitter),
            })
            .collect())
    }

    /// Reviewers currently holding `work_item_id`.
    pub async fn holders(&self, work_item_id: WorkItemId) -> Result<Vec<ReviewerId>> {
        let rows: Vec<(uuid::Uuid,)> = sqlx::query_as(
            "SELECT reviewer_id FROM assignments
             WHERE work_item_id = ?1 AND reviewer_id IS NOT NULL
             ORDER BY reviewer_id",
        )
        .bind(work_item_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(r,)| ReviewerId(r)).collect())
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Return unevaluated work held by non-eligible reviewers to the pool.
    pub async fn release_ineligible(&self) -> Result<u64> {
        let released = sqlx::query(
            "UPDATE assignments SET reviewer_id = NULL
             WHERE evaluated = 0 AND reviewer_id IS NOT NULL
               AND reviewer_id NOT IN (SELECT reviewer_id FROM reviewers WHERE eligible = 1)",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(released)
    }

    /// Give `reviewer` up to `limit` unassigned slots, each on a distinct
    /// work item it does not hold and did not submit.
    pub async fn claim(&self, reviewer: ReviewerId, user: UserId, limit: u64) -> Result<u64> {
        if limit == 0 {
            return Ok(0);
        }
        let claimed = sqlx::query(
            "UPDATE assignments SET reviewer_id = ?1, touched = 1
             WHERE assignment_id IN (
                SELECT MIN(a.assignment_id)
                FROM assignments a JOIN work_items w ON w.work_item_id = a.work_item_id
                WHERE a.reviewer_id IS NULL AND a.evaluated = 0
                  AND w.submitter_id != ?2
                  AND a.work_item_id NOT IN (
                      SELECT work_item_id FROM assignments WHERE reviewer_id = ?1)
                GROUP BY a.work_item_id
                ORDER BY a.work_item_id
                LIMIT ?3
             )",
        )
        .bind(reviewer.0)
        .bind(user.0)
        .bind(limit as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(claimed)
    }

    /// Assign slots to reviewers in one transaction.
    pub async fn assign_many(&self, pairs: Vec<(AssignmentId, ReviewerId)>) -> Result<u64> {
        if pairs.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut assigned = 0;
        for (assignment, reviewer) in pairs {
            assigned += sqlx::query(
                "UPDATE assignments SET reviewer_id = ?1, touched = 1
                 WHERE assignment_id = ?2 AND reviewer_id IS NULL AND evaluated = 0",
            )
            .bind(reviewer.0)
            .bind(assignment.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(assigned)
    }

    /// Least-loaded eligible reviewer that may take `assignment_id`.
    /// Ties go to the lowest reviewer ID.
    pub async fn fallback_candidate(
        &self,
        assignment_id: AssignmentId,
    ) -> Result<Option<ReviewerId>> {
        let row: Option<(uuid::Uuid,)> = sqlx::query_as(
            "SELECT r.reviewer_id
             FROM reviewers r, assignments s JOIN work_items w ON w.work_item_id = s.work_item_id
             WHERE s.assignment_id = ?1
               AND r.eligible = 1
               AND r.user_id != w.submitter_id
               AND r.reviewer_id NOT IN (
                   SELECT reviewer_id FROM assignments
                   WHERE work_item_id = s.work_item_id AND reviewer_id IS NOT NULL)
             ORDER BY (SELECT COUNT(*) FROM assignments x WHERE x.reviewer_id = r.reviewer_id),
                      r.reviewer_id
             LIMIT 1",
        )
        .bind(assignment_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(r,)| ReviewerId(r)))
    }

    /// Exchange one unevaluated assignment between `target` and `donor`.
    ///
    /// The target takes a donor row for an item it neither holds nor
    /// submitted; the donor takes a target row under the same rules. Rows
    /// already moved by this job are left alone. Returns false when no
    /// valid pair exists.
    pub async fn swap(
        &self,
        target: (ReviewerId, UserId),
        donor: (ReviewerId, UserId),
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let (target_id, target_user) = target;
        let (donor_id, donor_user) = donor;

        let incoming: Option<(uuid::Uuid,)> = sqlx::query_as(
            "SELECT a.assignment_id
             FROM assignments a JOIN work_items w ON w.work_item_id = a.work_item_id
             WHERE a.reviewer_id = ?1 AND a.evaluated = 0 AND a.touched = 0
               AND w.submitter_id != ?2
               AND a.work_item_id NOT IN (
                   SELECT work_item_id FROM assignments WHERE reviewer_id = ?3)
             ORDER BY a.assignment_id
             LIMIT 1",
        )
        .bind(donor_id.0)
        .bind(target_user.0)
        .bind(target_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let outgoing: Option<(uuid::Uuid,)> = sqlx::query_as(
            "SELECT a.assignment_id
             FROM assignments a JOIN work_items w ON w.work_item_id = a.work_item_id
             WHERE a.reviewer_id = ?1 AND a.evaluated = 0 AND a.touched = 0
               AND w.submitter_id != ?2
               AND a.work_item_id NOT IN (
                   SELECT work_item_id FROM assignments WHERE reviewer_id = ?3)
             ORDER BY a.assignment_id
             LIMIT 1",
        )
        .bind(target_id.0)
        .bind(donor_user.0)
        .bind(donor_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        // The target holds every outgoing item, so the two never coincide.
        let (Some((a,)), Some((b,))) = (incoming, outgoing) else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query("UPDATE assignments SET reviewer_id = ?1, touched = 1 WHERE assignment_id = ?2")
            .bind(target_id.0)
            .bind(a)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE assignments SET reviewer_id = ?1, touched = 1 WHERE assignment_id = ?2")
            .bind(donor_id.0)
            .bind(b)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Rows whose reviewer differs from what was imported.
    pub async fn changed_count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM assignments WHERE reviewer_id IS NOT original_reviewer_id",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }
}
