//! Job tracker: idempotent status records and the idempotency lock
//! (spec.md §3, §4.3). Every operation is keyed by request id and backed
//! by the shared [`Kv`] store.

use crate::kv::Kv;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("kv error: {0}")]
    Kv(#[from] crate::kv::KvError),
    #[error("corrupt job record for {0}: {1}")]
    Corrupt(String, serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Received,
    Running,
    Uploading,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub request_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn job_key(id: &str) -> String {
    format!("job:{id}")
}

fn lock_key(id: &str) -> String {
    format!("lock:{id}")
}

pub struct JobTracker {
    kv: Arc<dyn Kv>,
}

impl JobTracker {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    /// Returns the caller's request id verbatim, or mints a fresh UUIDv4
    /// (spec.md §3, §8 boundary: "exactly the caller's value when
    /// provided, else a well-formed UUIDv4").
    pub fn ensure_request_id(&self, maybe_id: Option<String>) -> String {
        maybe_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, JobError> {
        let Some(raw) = self.kv.get(&job_key(id)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| JobError::Corrupt(id.to_string(), err))
    }

    /// SETNX-with-TTL of a fresh token; `None` if another worker already
    /// holds the lock (spec.md §4.3).
    pub async fn acquire_lock(&self, id: &str, ttl_secs: u64) -> Result<Option<String>, JobError> {
        let token = Uuid::new_v4().to_string();
        let acquired = self.kv.set(&lock_key(id), &token, true, Some(ttl_secs)).await?;
        Ok(acquired.then_some(token))
    }

    /// Best-effort compare-then-delete; never surfaces an error to the
    /// caller — losing a lock release should not fail a job that already
    /// reached a terminal state (spec.md §4.3).
    pub async fn release_lock(&self, id: &str, token: &str) {
        match self.kv.delete_if_eq(&lock_key(id), token).await {
            Ok(true) => {}
            Ok(false) => warn!(request_id = id, "lock release no-op: token mismatch or already expired"),
            Err(err) => warn!(request_id = id, error = %err, "lock release failed"),
        }
    }

    /// Writes the job record with TTL, enforcing status monotonicity
    /// (spec.md §3 invariant): a terminal status already on record is
    /// never overwritten by a new write, terminal or not.
    pub async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        result: Option<Value>,
        error: Option<String>,
        ttl_secs: u64,
    ) -> Result<(), JobError> {
        if let Some(existing) = self.get_job(id).await? {
            if existing.status.is_terminal() {
                warn!(
                    request_id = id,
                    existing = ?existing.status,
                    attempted = ?status,
                    "ignoring status write: job already terminal"
                );
                return Ok(());
            }
        }

        let record = JobRecord {
            request_id: id.to_string(),
            status,
            result,
            error,
        };
        let payload = serde_json::to_string(&record).map_err(|err| JobError::Corrupt(id.to_string(), err))?;
        self.kv.set(&job_key(id), &payload, false, Some(ttl_secs)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn tracker() -> JobTracker {
        JobTracker::new(Arc::new(MemoryKv::new()))
    }

    #[test]
    fn ensure_request_id_uses_callers_value() {
        let tracker = tracker();
        assert_eq!(
            tracker.ensure_request_id(Some("R1".to_string())),
            "R1".to_string()
        );
    }

    #[test]
    fn ensure_request_id_mints_uuid_when_absent() {
        let tracker = tracker();
        let id = tracker.ensure_request_id(None);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn lock_acquire_is_exclusive() {
        let tracker = tracker();
        let first = tracker.acquire_lock("R1", 60).await.unwrap();
        assert!(first.is_some());

        let second = tracker.acquire_lock("R1", 60).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn release_with_wrong_token_is_noop() {
        let tracker = tracker();
        let token = tracker.acquire_lock("R1", 60).await.unwrap().unwrap();

        tracker.release_lock("R1", "not-the-token").await;
        // Lock still held: a second acquire must fail.
        assert!(tracker.acquire_lock("R1", 60).await.unwrap().is_none());

        tracker.release_lock("R1", &token).await;
        assert!(tracker.acquire_lock("R1", 60).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn status_writes_are_monotonic() {
        let tracker = tracker();
        tracker.set_status("R1", JobStatus::Received, None, None, 60).await.unwrap();
        tracker.set_status("R1", JobStatus::Running, None, None, 60).await.unwrap();
        tracker
            .set_status("R1", JobStatus::Succeeded, Some(serde_json::json!({"ok": true})), None, 60)
            .await
            .unwrap();

        // Attempting to write RUNNING again after SUCCEEDED must be ignored.
        tracker.set_status("R1", JobStatus::Running, None, None, 60).await.unwrap();

        let record = tracker.get_job("R1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn get_job_returns_none_for_unknown_id() {
        let tracker = tracker();
        assert!(tracker.get_job("ghost").await.unwrap().is_none());
    }
}
