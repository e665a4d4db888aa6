//! Job persistence.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use maestro_core::{MaestroResult, UserId};
use tracing::warn;

use crate::job::ScheduledJob;

/// Persistence seam for scheduled jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace one job.
    async fn save(&self, user_id: &UserId, job: &ScheduledJob) -> MaestroResult<()>;

    /// Remove one job. Removing an unknown id is not an error.
    async fn remove(&self, user_id: &UserId, job_id: &str) -> MaestroResult<()>;

    /// Every persisted job, grouped by user.
    async fn load_all(&self) -> MaestroResult<HashMap<UserId, Vec<ScheduledJob>>>;
}

/// Stores each user's jobs as one pretty-printed JSON file.
pub struct FileJobStore {
    base_dir: PathBuf,
}

impl FileJobStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn user_path(&self, user_id: &UserId) -> PathBuf {
        self.base_dir.join(format!("{user_id}.json"))
    }

    async fn load_user(&self, user_id: &UserId) -> MaestroResult<Vec<ScheduledJob>> {
        let path = self.user_path(user_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_user(&self, user_id: &UserId, jobs: &[ScheduledJob]) -> MaestroResult<()> {
        let path = self.user_path(user_id);
        if jobs.is_empty() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let json = serde_json::to_string_pretty(jobs)?;
        tokio::fs::write(&path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn save(&self, user_id: &UserId, job: &ScheduledJob) -> MaestroResult<()> {
        let mut jobs = self.load_user(user_id).await?;
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(slot) => *slot = job.clone(),
            None => jobs.push(job.clone()),
        }
        self.write_user(user_id, &jobs).await
    }

    async fn remove(&self, user_id: &UserId, job_id: &str) -> MaestroResult<()> {
        let mut jobs = self.load_user(user_id).await?;
        jobs.retain(|j| j.id != job_id);
        self.write_user(user_id, &jobs).await
    }

    async fn load_all(&self) -> MaestroResult<HashMap<UserId, Vec<ScheduledJob>>> {
        let mut all = HashMap::new();
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(all),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let user_id = UserId::new(stem);
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) => match serde_json::from_str::<Vec<ScheduledJob>>(&raw) {
                    Ok(jobs) => {
                        all.insert(user_id, jobs);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unparseable job file");
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable job file");
                }
            }
        }
        Ok(all)
    }
}

/// In-memory store for tests and embedders that do not persist.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: parking_lot::Mutex<HashMap<UserId, Vec<ScheduledJob>>>,
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, user_id: &UserId, job: &ScheduledJob) -> MaestroResult<()> {
        let mut all = self.jobs.lock();
        let jobs = all.entry(user_id.clone()).or_default();
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(slot) => *slot = job.clone(),
            None => jobs.push(job.clone()),
        }
        Ok(())
    }

    async fn remove(&self, user_id: &UserId, job_id: &str) -> MaestroResult<()> {
        if let Some(jobs) = self.jobs.lock().get_mut(user_id) {
            jobs.retain(|j| j.id != job_id);
        }
        Ok(())
    }

    async fn load_all(&self) -> MaestroResult<HashMap<UserId, Vec<ScheduledJob>>> {
        Ok(self.jobs.lock().clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::job::ScheduleKind;
    use chrono::Utc;

    fn job(id: &str) -> ScheduledJob {
        ScheduledJob {
            id: id.into(),
            name: format!("job {id}"),
            kind: ScheduleKind::Daily,
            hour: 8,
            minute: 30,
            weekdays: None,
            month_day: None,
            interval_minutes: None,
            run_date: None,
            start_time: None,
            enabled: true,
            max_runs: None,
            run_count: 0,
            last_run: None,
            created_at: Utc::now(),
            prompt: Some("work".into()),
        }
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        let user = UserId::new("u1");

        store.save(&user, &job("a")).await.unwrap();
        store.save(&user, &job("b")).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        let jobs = &all[&user];
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().any(|j| j.id == "a"));
        assert!(jobs.iter().any(|j| j.id == "b"));
    }

    #[tokio::test]
    async fn test_save_replaces_existing_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        let user = UserId::new("u1");

        store.save(&user, &job("a")).await.unwrap();
        let mut updated = job("a");
        updated.run_count = 5;
        store.save(&user, &updated).await.unwrap();

        let all = store.load_all().await.unwrap();
        let jobs = &all[&user];
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].run_count, 5);
    }

    #[tokio::test]
    async fn test_removing_the_last_job_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        let user = UserId::new("u1");

        store.save(&user, &job("a")).await.unwrap();
        store.remove(&user, "a").await.unwrap();

        assert!(!dir.path().join("u1.json").exists());
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_all_on_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path().join("nope"));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_all_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        let user = UserId::new("good");

        store.save(&user, &job("a")).await.unwrap();
        tokio::fs::write(dir.path().join("bad.json"), "{ not json")
            .await
            .unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key(&user));
    }
}
