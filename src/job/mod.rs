//! Job lifecycle: the engine, the per-job execution loop, and job state.

mod controller;
mod execute;
mod types;

pub use controller::{Engine, EngineBuilder};
pub use types::{JobParams, JobSlot, JobStatus, JobView};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::SubmitError;
    use crate::images::ImagePipeline;
    use crate::proxy::ProxyPool;
    use crate::storage::MemoryStorage;
    use crate::worker::{Platform, ScrapeFilters};

    fn params(max_items: usize) -> JobParams {
        JobParams {
            platform: Platform::Ebay,
            query: "gold ring".to_string(),
            max_items,
            filters: ScrapeFilters::default(),
        }
    }

    fn engine() -> Arc<Engine> {
        let dir = tempfile::tempdir().unwrap();
        let images = ImagePipeline::new(dir.path().to_path_buf()).unwrap();
        Engine::new(
            ProxyPool::new(Vec::new()),
            images,
            Arc::new(MemoryStorage::new()),
        )
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_max_items() {
        let engine = engine();
        let err = engine.submit(None, params(0)).await.unwrap_err();
        assert!(matches!(err, SubmitError::MaxItemsOutOfRange { .. }));
        let err = engine.submit(None, params(100_000)).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::MaxItemsOutOfRange { requested: 100_000, .. }
        ));
    }

    #[tokio::test]
    async fn test_submit_rejects_duplicate_id() {
        let engine = engine();
        let id = engine
            .submit(Some("fixed".to_string()), params(5))
            .await
            .unwrap();
        assert_eq!(id, "fixed");
        let err = engine
            .submit(Some("fixed".to_string()), params(5))
            .await
            .unwrap_err();
        assert_eq!(err, SubmitError::DuplicateJobId("fixed".to_string()));
    }

    #[tokio::test]
    async fn test_status_of_unknown_job_is_none() {
        let engine = engine();
        assert!(engine.status("nope").await.is_none());
        assert!(!engine.cancel("nope").await);
    }

    #[tokio::test]
    async fn test_cancel_before_start_terminates_quickly() {
        let engine = engine();
        let id = engine.submit(None, params(5)).await.unwrap();
        assert!(engine.cancel(&id).await);

        let mut status = JobStatus::Pending;
        for _ in 0..50 {
            status = engine.status(&id).await.unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(status, JobStatus::Cancelled);
        // A second cancel of a terminal job is a no-op.
        assert!(!engine.cancel(&id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_expired_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let images = ImagePipeline::new(dir.path().to_path_buf()).unwrap();
        let engine = Engine::builder(
            ProxyPool::new(Vec::new()),
            images,
            Arc::new(MemoryStorage::new()),
        )
        .retention(std::time::Duration::ZERO)
        .build();

        let id = engine.submit(None, params(5)).await.unwrap();
        engine.cancel(&id).await;
        loop {
            if engine.status(&id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        engine.sweep().await;
        assert!(engine.status(&id).await.is_none());
    }
}
