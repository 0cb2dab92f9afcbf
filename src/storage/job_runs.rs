use crate::model::{JobRun, JobStatus, StorageError, TriggerType};
use crate::storage::sqlite::{SqliteStorage, parse_ts};
use crate::utils::format_ts;

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use serde_json::Value;

pub const MAX_RUNS_PAGE: usize = 100;

const JOB_RUN_COLUMNS: &str =
    "id, job_name, status, trigger_type, triggered_by, started_at, finished_at, params, stats, error";

impl SqliteStorage {
    /// Opens a run in `running` with a snapshot of its parameters.
    pub fn create_job_run(
        &self,
        job_name: &str,
        trigger: TriggerType,
        triggered_by: Option<&str>,
        params: &Value,
        started_at: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO job_runs (job_name, status, trigger_type, triggered_by, started_at, params)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job_name,
                JobStatus::Running.as_str(),
                trigger.as_str(),
                triggered_by,
                format_ts(&started_at),
                serde_json::to_string(params)?,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn complete_job_run(&self, id: i64, stats: &Value, finished_at: DateTime<Utc>) -> Result<(), StorageError> {
        self.finish(id, JobStatus::Completed, Some(stats), None, finished_at)
    }

    pub fn fail_job_run(
        &self,
        id: i64,
        error: &str,
        stats: Option<&Value>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.finish(id, JobStatus::Failed, stats, Some(error), finished_at)
    }

    /// Only a `running` row can be finalized; anything else is `NotFound`.
    fn finish(
        &self,
        id: i64,
        status: JobStatus,
        stats: Option<&Value>,
        error: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let stats = stats.map(serde_json::to_string).transpose()?;
        let changed = self.conn.execute(
            "UPDATE job_runs SET status = ?1, stats = ?2, error = ?3, finished_at = ?4
             WHERE id = ?5 AND status = ?6",
            params![
                status.as_str(),
                stats,
                error,
                format_ts(&finished_at),
                id,
                JobStatus::Running.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    /// Newest first.
    pub fn list_job_runs(&self, limit: usize, offset: usize) -> Result<Vec<JobRun>, StorageError> {
        let limit = limit.clamp(1, MAX_RUNS_PAGE);
        let sql = format!("SELECT {} FROM job_runs ORDER BY id DESC LIMIT ?1 OFFSET ?2", JOB_RUN_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![limit as i64, offset as i64])?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next()? {
            runs.push(map_job_run(row)?);
        }
        Ok(runs)
    }

    pub fn get_job_run(&self, id: i64) -> Result<Option<JobRun>, StorageError> {
        let sql = format!("SELECT {} FROM job_runs WHERE id = ?1", JOB_RUN_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(map_job_run(row)?)),
            None => Ok(None),
        }
    }
}

fn map_job_run(row: &Row) -> Result<JobRun, StorageError> {
    let status: String = row.get(2)?;
    let finished_at: Option<String> = row.get(6)?;
    let stats: Option<String> = row.get(8)?;

    Ok(JobRun {
        id: row.get(0)?,
        job_name: row.get(1)?,
        status: status.parse()?,
        trigger_type: row.get(3)?,
        triggered_by: row.get(4)?,
        started_at: parse_ts(&row.get::<_, String>(5)?)?,
        finished_at: finished_at.as_deref().map(parse_ts).transpose()?,
        params: serde_json::from_str(&row.get::<_, String>(7)?)?,
        stats: stats.as_deref().map(serde_json::from_str).transpose()?,
        error: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn run_moves_from_running_to_completed() {
        let s = SqliteStorage::in_memory().unwrap();
        let t0 = Utc::now();
        let id = s
            .create_job_run("crawl", TriggerType::Manual, Some("ops"), &json!({"city": "Campinas"}), t0)
            .unwrap();

        let run = s.get_job_run(id).unwrap().unwrap();
        assert_eq!(run.status, JobStatus::Running);
        assert_eq!(run.params["city"], "Campinas");
        assert!(run.finished_at.is_none());

        s.complete_job_run(id, &json!({"received": 3}), t0 + Duration::seconds(5)).unwrap();
        let run = s.get_job_run(id).unwrap().unwrap();
        assert_eq!(run.status, JobStatus::Completed);
        assert_eq!(run.stats, Some(json!({"received": 3})));
        assert_eq!(run.triggered_by.as_deref(), Some("ops"));
        assert_eq!(run.trigger_type, "manual");
    }

    #[test]
    fn terminal_runs_cannot_be_finalized_again() {
        let s = SqliteStorage::in_memory().unwrap();
        let id = s.create_job_run("crawl", TriggerType::Api, None, &json!({}), Utc::now()).unwrap();
        s.fail_job_run(id, "all candidates failed", None, Utc::now()).unwrap();
        assert!(matches!(
            s.complete_job_run(id, &json!({}), Utc::now()),
            Err(StorageError::NotFound)
        ));
        let run = s.get_job_run(id).unwrap().unwrap();
        assert_eq!(run.status, JobStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("all candidates failed"));
        assert!(s.get_job_run(id + 1).unwrap().is_none());
    }

    #[test]
    fn list_is_newest_first_and_paged() {
        let s = SqliteStorage::in_memory().unwrap();
        for _ in 0..3 {
            s.create_job_run("crawl", TriggerType::Scheduled, None, &json!({}), Utc::now()).unwrap();
        }
        let ids: Vec<i64> = s.list_job_runs(2, 0).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2]);
        let ids: Vec<i64> = s.list_job_runs(2, 2).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1]);
    }
}
