//! Export job tracking.
//!
//! A job is followed over the backend's push channel when one is offered,
//! falling back to fixed-interval polling. Either path stops at the first
//! terminal status. Nothing here touches the timeline.

use std::sync::{Arc, Weak};

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::backend::ArchiveBackend;
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::models::{ExportJob, ExportParams, ExportStatus};
use crate::observable::{Observable, SubscriptionId};
use crate::task::TaskSlot;

/// How progress is currently being received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressChannel {
    #[default]
    Detached,
    Push,
    Poll,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSnapshot {
    pub job: Option<ExportJob>,
    pub channel: ProgressChannel,
    pub error: Option<String>,
}

struct ExportInner {
    backend: Arc<dyn ArchiveBackend>,
    config: CoreConfig,
    state: Observable<ExportSnapshot>,
    channel: TaskSlot,
}

impl ExportInner {
    /// Record a job update. Returns true when the tracked job is terminal.
    ///
    /// Once a job is terminal, later updates for it are ignored.
    fn apply_job(&self, job: ExportJob) -> bool {
        self.state.update(|snapshot| {
            if let Some(current) = &snapshot.job {
                if current.export_id == job.export_id && current.status.is_terminal() {
                    return true;
                }
            }

            let terminal = job.status.is_terminal();
            if job.status == ExportStatus::Error {
                let failure = CoreError::JobFailed {
                    export_id: job.export_id.clone(),
                    message: job
                        .error
                        .clone()
                        .unwrap_or_else(|| "export failed".to_string()),
                };
                error!(export_id = %job.export_id, error = %failure, "export job failed");
                snapshot.error = Some(failure.to_string());
            }
            if terminal {
                info!(export_id = %job.export_id, status = ?job.status, "export job finished");
                snapshot.channel = ProgressChannel::Detached;
            }
            snapshot.job = Some(job);
            terminal
        })
    }

    fn set_channel(&self, channel: ProgressChannel) {
        self.state.update(|snapshot| snapshot.channel = channel);
    }
}

/// Tracks one export job at a time. Clones share state.
#[derive(Clone)]
pub struct ExportTracker {
    inner: Arc<ExportInner>,
}

impl ExportTracker {
    pub fn new(backend: Arc<dyn ArchiveBackend>, config: CoreConfig) -> Self {
        Self {
            inner: Arc::new(ExportInner {
                backend,
                config,
                state: Observable::default(),
                channel: TaskSlot::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> ExportSnapshot {
        self.inner.state.snapshot()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&ExportSnapshot) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.state.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.state.unsubscribe(id)
    }

    pub fn job(&self) -> Option<ExportJob> {
        self.inner.state.snapshot().job
    }

    pub fn is_attached(&self) -> bool {
        self.inner.channel.is_running()
    }

    /// Validate `params` and create the server-side job.
    ///
    /// Invalid parameters fail with `Validation` before any request is sent.
    pub async fn create(&self, params: &ExportParams) -> Result<ExportJob> {
        if let Err(err) = params.validate() {
            self.inner.state.update(|s| s.error = Some(err.to_string()));
            return Err(err);
        }

        match self.inner.backend.create_export_job(params).await {
            Ok(job) => {
                info!(
                    export_id = %job.export_id,
                    conversations = params.conversation_ids.len(),
                    format = ?params.format,
                    "export job created"
                );
                self.inner.state.update(|s| {
                    s.job = Some(job.clone());
                    s.error = None;
                });
                Ok(job)
            }
            Err(err) => {
                error!(error = %err, "export job creation failed");
                self.inner.state.update(|s| s.error = Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Create a job and start following it.
    pub async fn start(&self, params: &ExportParams) -> Result<ExportJob> {
        let job = self.create(params).await?;
        if !job.status.is_terminal() {
            self.attach(&job.export_id);
        }
        Ok(job)
    }

    /// Follow progress for `export_id`, replacing any previous channel.
    pub fn attach(&self, export_id: &str) {
        self.inner.channel.abort();
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.export_poll_interval();
        let export_id = export_id.to_string();
        debug!(%export_id, "attaching export progress");
        self.inner.channel.spawn(follow(weak, export_id, interval));
    }

    /// Tear down the channel and poll timer without touching the job.
    pub fn detach(&self) {
        if self.inner.channel.abort() {
            debug!("export progress detached");
        }
        self.inner.set_channel(ProgressChannel::Detached);
    }

    /// Request cancellation, then re-fetch once to confirm the final status.
    pub async fn cancel(&self, export_id: &str) -> Result<ExportJob> {
        if let Err(err) = self.inner.backend.cancel_export_job(export_id).await {
            error!(%export_id, error = %err, "export cancel failed");
            self.inner.state.update(|s| s.error = Some(err.to_string()));
            return Err(err);
        }

        let job = self.inner.backend.get_export_job(export_id).await?;
        if self.inner.apply_job(job.clone()) {
            self.inner.channel.abort();
        }
        Ok(self.job().unwrap_or(job))
    }

    /// Wait for the progress channel to stop on its own.
    pub async fn finished(&self) {
        self.inner.channel.join().await
    }
}

async fn follow(weak: Weak<ExportInner>, export_id: String, interval: std::time::Duration) {
    let pushed = match weak.upgrade() {
        Some(inner) => inner.backend.export_progress(&export_id).await,
        None => return,
    };

    match pushed {
        Ok(Some(mut stream)) => {
            if let Some(inner) = weak.upgrade() {
                inner.set_channel(ProgressChannel::Push);
            }
            while let Some(update) = stream.next().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match update {
                    Ok(job) => {
                        if inner.apply_job(job) {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(%export_id, error = %err, "progress channel failed, polling instead");
                        break;
                    }
                }
            }
        }
        Ok(None) => debug!(%export_id, "no progress channel, polling"),
        Err(err) => warn!(%export_id, error = %err, "progress channel unavailable, polling"),
    }

    match weak.upgrade() {
        Some(inner) => inner.set_channel(ProgressChannel::Poll),
        None => return,
    }
    loop {
        tokio::time::sleep(interval).await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match inner.backend.get_export_job(&export_id).await {
            Ok(job) => {
                if inner.apply_job(job) {
                    return;
                }
            }
            Err(err) => warn!(%export_id, error = %err, "export status poll failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{job, Call, MockBackend};
    use std::time::Duration;

    fn tracker(backend: &Arc<MockBackend>) -> ExportTracker {
        ExportTracker::new(backend.clone(), CoreConfig::default())
    }

    fn polls(backend: &MockBackend) -> usize {
        backend.count(|c| matches!(c, Call::GetExport))
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_channel_stops_at_terminal() {
        let backend = MockBackend::new();
        backend.set_push_updates(vec![
            Ok(job("exp-1", ExportStatus::Queued)),
            Ok(job("exp-1", ExportStatus::Running)),
            Ok(job("exp-1", ExportStatus::Done)),
            Ok(job("exp-1", ExportStatus::Running)),
        ]);
        let tracker = tracker(&backend);

        tracker.attach("exp-1");
        tracker.finished().await;

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.job.unwrap().status, ExportStatus::Done);
        assert_eq!(snapshot.channel, ProgressChannel::Detached);
        assert_eq!(backend.pulled_push_items(), 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(polls(&backend), 0);
        assert_eq!(backend.pulled_push_items(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_polling() {
        let backend = MockBackend::new();
        backend.script_export_polls(vec![
            job("exp-1", ExportStatus::Queued),
            job("exp-1", ExportStatus::Running),
            job("exp-1", ExportStatus::Done),
        ]);
        let tracker = tracker(&backend);

        tracker.attach("exp-1");
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(tracker.snapshot().channel, ProgressChannel::Poll);

        tracker.finished().await;
        assert_eq!(tracker.job().unwrap().status, ExportStatus::Done);
        assert_eq!(polls(&backend), 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(polls(&backend), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_error_switches_to_polling() {
        let backend = MockBackend::new();
        backend.set_push_updates(vec![
            Ok(job("exp-1", ExportStatus::Running)),
            Err(CoreError::Network("stream reset".into())),
        ]);
        backend.script_export_polls(vec![job("exp-1", ExportStatus::Done)]);
        let tracker = tracker(&backend);

        tracker.attach("exp-1");
        tracker.finished().await;

        assert_eq!(tracker.job().unwrap().status, ExportStatus::Done);
        assert_eq!(polls(&backend), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_error_is_surfaced() {
        let backend = MockBackend::new();
        let mut failed = job("exp-1", ExportStatus::Error);
        failed.error = Some("disk full".into());
        backend.set_push_updates(vec![Ok(failed)]);
        let tracker = tracker(&backend);

        tracker.attach("exp-1");
        tracker.finished().await;

        let error = tracker.snapshot().error.unwrap();
        assert!(error.contains("exp-1"));
        assert!(error.contains("disk full"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_confirms_terminal_and_stops_polling() {
        let backend = MockBackend::new();
        backend.script_export_polls(vec![job("exp-1", ExportStatus::Running)]);
        let tracker = tracker(&backend);

        tracker.attach("exp-1");
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(polls(&backend), 2);

        let confirmed = tracker.cancel("exp-1").await.unwrap();
        assert_eq!(confirmed.status, ExportStatus::Cancelled);
        assert!(!tracker.is_attached());
        let after_cancel = polls(&backend);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(polls(&backend), after_cancel);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_releases_poll_timer() {
        let backend = MockBackend::new();
        backend.script_export_polls(vec![job("exp-1", ExportStatus::Running)]);
        let tracker = tracker(&backend);

        tracker.attach("exp-1");
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        tracker.detach();
        let seen = polls(&backend);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(polls(&backend), seen);
        assert_eq!(tracker.snapshot().channel, ProgressChannel::Detached);
        assert_eq!(tracker.job().unwrap().status, ExportStatus::Running);
    }

    #[tokio::test]
    async fn test_invalid_params_send_nothing() {
        let backend = MockBackend::new();
        let tracker = tracker(&backend);

        let err = tracker
            .create(&ExportParams::new("wxid_me", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(backend.calls().is_empty());
        assert!(tracker.snapshot().error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_creates_and_follows() {
        let backend = MockBackend::new();
        backend.script_export_polls(vec![job("exp-2", ExportStatus::Done)]);
        let tracker = tracker(&backend);

        let params = ExportParams::new("wxid_me", vec!["room_a".into(), "room_b".into()]);
        let created = tracker.start(&params).await.unwrap();
        assert_eq!(created.status, ExportStatus::Queued);

        tracker.finished().await;
        assert_eq!(tracker.job().unwrap().status, ExportStatus::Done);
        assert_eq!(backend.count(|c| matches!(c, Call::CreateExport)), 1);
    }
}
