//! Periodic reconciliation: repair webhook loss and destination drift.
//!
//! The reconciler enqueues task work instead of writing task pages itself,
//! so the worker's ordering and idempotence invariants apply uniformly. It
//! then drains the queue synchronously so the trigger endpoint can report a
//! summary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use tm_core::{
    DestApi, PagePayload, PropertyValue, SourceApi, StateStore, SyncMessage, SyncStatus,
    TaskStateFilter, TmError, TmResult,
};

use crate::config::SyncConfig;
use crate::reverse::{project_reverse_pass, ReverseOutcome};
use crate::worker::SyncWorker;

/// Enqueue no further work while this many messages are still unfinished.
const MAX_ENQUEUE_BACKLOG: u64 = 256;
const BACKPRESSURE_PAUSE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReconcileSummary {
    pub active_found: usize,
    pub upserted: usize,
    pub archived: usize,
    pub errors: usize,
    pub duration_s: f64,
    #[serde(skip_serializing_if = "is_default_reverse")]
    pub reverse: ReverseOutcome,
}

fn is_default_reverse(r: &ReverseOutcome) -> bool {
    *r == ReverseOutcome::default()
}

pub struct Reconciler {
    source: Arc<dyn SourceApi>,
    dest: Arc<dyn DestApi>,
    store: Arc<dyn StateStore>,
    worker: Arc<SyncWorker>,
    cfg: Arc<SyncConfig>,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn SourceApi>,
        dest: Arc<dyn DestApi>,
        store: Arc<dyn StateStore>,
        worker: Arc<SyncWorker>,
        cfg: Arc<SyncConfig>,
    ) -> Self {
        Self {
            source,
            dest,
            store,
            worker,
            cfg,
        }
    }

    pub async fn run(&self) -> TmResult<ReconcileSummary> {
        let started = Instant::now();
        tracing::info!("reconciliation started");

        let tagged = self.source.list_tagged(&self.cfg.eligibility_tag).await?;
        let active_found = tagged.len();
        let active_ids: Vec<&str> = tagged.iter().map(|i| i.id.as_str()).collect();

        let queue = self.worker.queue();
        let mut enqueued_upserts = 0;
        for item in &tagged {
            self.wait_for_capacity().await?;
            let message = SyncMessage::upsert(&item.id, tm_core::SyncSource::Reconciler)
                .with_snapshot(item.clone());
            queue.enqueue(&message).await?;
            enqueued_upserts += 1;
        }

        // Mirrors whose source item no longer carries the tag get archived.
        let mut enqueued_archives = 0;
        let ok_rows = self
            .store
            .list_tasks(TaskStateFilter {
                status: Some(SyncStatus::Ok),
            })
            .await?;
        for row in ok_rows {
            if !active_ids.contains(&row.source_item_id.as_str()) {
                self.wait_for_capacity().await?;
                queue
                    .enqueue(&SyncMessage::archive(
                        &row.source_item_id,
                        tm_core::SyncSource::Reconciler,
                    ))
                    .await?;
                enqueued_archives += 1;
            }
        }

        let (_, errors) = self.worker.drain_available().await;

        let status_errors = self.reconcile_project_status().await;
        let reverse = project_reverse_pass(&self.store, &self.source, &self.dest).await?;

        let summary = ReconcileSummary {
            active_found,
            upserted: enqueued_upserts,
            archived: enqueued_archives,
            errors: errors + status_errors,
            duration_s: started.elapsed().as_secs_f64(),
            reverse,
        };
        tracing::info!(
            active_found = summary.active_found,
            upserted = summary.upserted,
            archived = summary.archived,
            errors = summary.errors,
            duration_s = summary.duration_s,
            "reconciliation completed"
        );
        Ok(summary)
    }

    async fn wait_for_capacity(&self) -> TmResult<()> {
        loop {
            let stats = self.worker.queue().stats().await?;
            if stats.backlog() < MAX_ENQUEUE_BACKLOG {
                return Ok(());
            }
            tracing::debug!(backlog = stats.backlog(), "queue saturated, pausing enqueue");
            tokio::time::sleep(BACKPRESSURE_PAUSE).await;
        }
    }

    /// Forward direction of project upkeep: the source archive flag drives
    /// the destination Status select. Returns the number of failures.
    async fn reconcile_project_status(&self) -> usize {
        let projects = match self.store.list_projects().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "failed to list project states");
                return 1;
            }
        };

        let mut errors = 0;
        for state in projects {
            let result = self.sync_one_project_status(&state.source_project_id, &state.dest_page_id).await;
            if let Err(e) = result {
                tracing::error!(
                    project_id = %state.source_project_id,
                    error = %e,
                    "project status reconciliation failed"
                );
                errors += 1;
            }
        }
        errors
    }

    async fn sync_one_project_status(
        &self,
        source_project_id: &str,
        dest_page_id: &str,
    ) -> TmResult<()> {
        let project = match self.source.fetch_project(source_project_id).await {
            Ok(p) => p,
            Err(TmError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let page = match self.dest.get_page(dest_page_id).await {
            Ok(p) => p,
            Err(TmError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let wanted = if project.is_archived { "Archived" } else { "Active" };
        if page.status.as_deref() == Some(wanted) {
            return Ok(());
        }

        tracing::info!(
            project_id = %source_project_id,
            status = wanted,
            "updating destination project status"
        );
        let mut payload = PagePayload::default();
        payload.set("Status", PropertyValue::Select(Some(wanted.into())));
        self.dest.update_page(dest_page_id, &payload).await?;
        Ok(())
    }
}
