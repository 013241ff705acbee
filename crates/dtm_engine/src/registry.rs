use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dtm_core::{JobId, JobRecord, JobRequest};
use tokio::sync::RwLock;

use crate::channel::ProgressChannel;

/// One registered job: its record, its event channel and its scratch directory.
#[derive(Debug)]
pub struct JobEntry {
    pub record: RwLock<JobRecord>,
    pub channel: ProgressChannel,
    pub work_dir: PathBuf,
}

/// Map of live jobs. The map lock is held only to insert, look up or remove an
/// entry; reads and writes of a job's record go through that entry's own lock.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a `Pending` job under a fresh id; `work_dir` is given that id.
    pub async fn register(
        &self,
        request: JobRequest,
        channel: ProgressChannel,
        work_dir: impl Fn(&JobId) -> PathBuf,
    ) -> Arc<JobEntry> {
        let mut jobs = self.jobs.write().await;
        let mut id = JobId::generate();
        while jobs.contains_key(&id) {
            id = JobId::generate();
        }
        let entry = Arc::new(JobEntry {
            work_dir: work_dir(&id),
            record: RwLock::new(JobRecord::new(id.clone(), request)),
            channel,
        });
        jobs.insert(id, entry.clone());
        entry
    }

    pub async fn get(&self, id: &JobId) -> Option<Arc<JobEntry>> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn evict(&self, id: &JobId) -> Option<Arc<JobEntry>> {
        self.jobs.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn registered_jobs_get_distinct_ids() {
        let registry = JobRegistry::new();
        let mut ids = Vec::new();
        for _ in 0..50 {
            let entry = registry
                .register(
                    JobRequest::new(Vec::new()),
                    ProgressChannel::new(4, Duration::from_secs(1)),
                    |id| PathBuf::from("/jobs").join(id.as_str()),
                )
                .await;
            let id = entry.record.read().await.id().clone();
            assert_eq!(entry.work_dir, PathBuf::from("/jobs").join(id.as_str()));
            ids.push(id);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 50);
        assert_eq!(registry.len().await, 50);

        let removed = registry.evict(&ids[0]).await;
        assert!(removed.is_some());
        assert!(registry.get(&ids[0]).await.is_none());
        assert_eq!(registry.len().await, 49);
    }
}
