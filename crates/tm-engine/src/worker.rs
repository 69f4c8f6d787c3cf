//! The sync worker: classify, fetch, map, resolve, write, persist.
//!
//! Messages for one source item serialize through a keyed lock; unrelated
//! items interleave freely across the pool. Every write step is idempotent
//! (hash-guarded page writes, idempotent tag calls) so redelivery after a
//! crash or timeout is safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use tm_core::{
    Block, DestApi, DestPage, PageKind, PropertyValue, SourceApi, SourceItemBundle, StateStore,
    SyncAction, SyncMessage, SyncSource, SyncStatus, TaskSyncState, TmError, TmResult,
};

use crate::backlinks::{append_backlinks, orphan_notice};
use crate::config::SyncConfig;
use crate::hash::payload_hash;
use crate::keyed_lock::KeyedLocks;
use crate::labels::partition_labels;
use crate::mapper::map_item;
use crate::queue::SyncQueue;
use crate::resolver::{ResolvedRelations, Resolver};

pub struct SyncWorker {
    queue: Arc<SyncQueue>,
    source: Arc<dyn SourceApi>,
    dest: Arc<dyn DestApi>,
    store: Arc<dyn StateStore>,
    resolver: Arc<Resolver>,
    cfg: Arc<SyncConfig>,
    item_locks: KeyedLocks,
    poll_interval: Duration,
}

impl SyncWorker {
    pub fn new(
        queue: Arc<SyncQueue>,
        source: Arc<dyn SourceApi>,
        dest: Arc<dyn DestApi>,
        store: Arc<dyn StateStore>,
        resolver: Arc<Resolver>,
        cfg: Arc<SyncConfig>,
    ) -> Self {
        Self {
            queue,
            source,
            dest,
            store,
            resolver,
            cfg,
            item_locks: KeyedLocks::new(),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    /// Spawn `worker_concurrency` polling tasks. Each drains runnable
    /// messages on its tick and stops on the shutdown signal.
    pub fn spawn_pool(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        (0..self.cfg.worker_concurrency.max(1))
            .map(|i| {
                let worker = Arc::clone(self);
                let mut rx = shutdown.subscribe();
                tokio::spawn(async move {
                    tracing::info!(worker = i, "sync worker started");
                    loop {
                        tokio::select! {
                            _ = rx.recv() => {
                                tracing::info!(worker = i, "sync worker shutting down");
                                break;
                            }
                            _ = tokio::time::sleep(worker.poll_interval) => {
                                worker.drain_available().await;
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Process runnable messages until the queue momentarily empties.
    /// Returns (succeeded, errored) counts.
    pub async fn drain_available(&self) -> (usize, usize) {
        let mut ok = 0;
        let mut errored = 0;
        loop {
            match self.queue.dequeue().await {
                Ok(Some((id, message))) => {
                    if self.handle_queued(id, &message).await {
                        ok += 1;
                    } else {
                        errored += 1;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "dequeue error");
                    break;
                }
            }
        }
        (ok, errored)
    }

    /// Run one queued message and settle it: ack on success, nack for
    /// redelivery on retryable failures, persist an error note and ack on
    /// permanent ones (acking prevents redelivery storms).
    async fn handle_queued(&self, id: Uuid, message: &SyncMessage) -> bool {
        match self.process(message).await {
            Ok(()) => {
                if let Err(e) = self.queue.complete(id).await {
                    tracing::error!(message_id = %id, error = %e, "failed to ack message");
                }
                true
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    item_id = %message.source_item_id,
                    error = %e,
                    "retryable failure, nacking for redelivery"
                );
                if let Err(fail_err) = self.queue.fail(id, &e.to_string()).await {
                    tracing::error!(message_id = %id, error = %fail_err, "failed to nack message");
                }
                false
            }
            Err(TmError::Cancelled) => {
                // No state was written; let the queue redeliver.
                if let Err(fail_err) = self.queue.fail(id, "cancelled").await {
                    tracing::error!(message_id = %id, error = %fail_err, "failed to nack message");
                }
                false
            }
            Err(e) => {
                tracing::error!(
                    item_id = %message.source_item_id,
                    error = %e,
                    "permanent failure, recording error state"
                );
                self.record_error(&message.source_item_id, message.source, &e)
                    .await;
                if let Err(ack_err) = self.queue.complete(id).await {
                    tracing::error!(message_id = %id, error = %ack_err, "failed to ack message");
                }
                false
            }
        }
    }

    /// Process one message under the per-item lock.
    pub async fn process(&self, message: &SyncMessage) -> TmResult<()> {
        let _guard = self.item_locks.acquire(&message.source_item_id).await;
        match message.action {
            SyncAction::Upsert => self.handle_upsert(message).await,
            SyncAction::Archive => self.handle_archive(message).await,
        }
    }

    async fn load_bundle(&self, message: &SyncMessage) -> TmResult<Option<SourceItemBundle>> {
        if let Some(snapshot) = &message.snapshot {
            let project = self.source.fetch_project(&snapshot.project_id).await?;
            let comments = self.source.fetch_comments(&snapshot.id).await?;
            let section_name = match &snapshot.section_id {
                Some(sid) => self.source.fetch_section_name(sid).await?,
                None => None,
            };
            return Ok(Some(SourceItemBundle {
                item: snapshot.clone(),
                project,
                comments,
                section_name,
            }));
        }
        match self.source.fetch_item(&message.source_item_id).await {
            Ok(bundle) => Ok(Some(bundle)),
            Err(TmError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn handle_upsert(&self, message: &SyncMessage) -> TmResult<()> {
        let item_id = &message.source_item_id;
        let state = self.store.get_task(item_id).await?;

        let Some(bundle) = self.load_bundle(message).await? else {
            if state.is_some() {
                tracing::info!(item_id = %item_id, "source item deleted, archiving mirror");
                return self.archive_mirror(message).await;
            }
            tracing::debug!(item_id = %item_id, "unknown deleted item, nothing to do");
            return Ok(());
        };

        let item = &bundle.item;
        let tag = self.cfg.eligibility_tag.clone();
        let mut has_tag = item.has_label(&tag);
        let recurring_blocked = self.cfg.skip_recurring && item.is_recurring();
        let inbox_blocked = self.cfg.skip_inbox && bundle.project.is_inbox_project;

        // Reconciler-sourced items that qualify but lost the tag get it back.
        if !has_tag
            && self.cfg.auto_label
            && message.source == SyncSource::Reconciler
            && !recurring_blocked
            && !inbox_blocked
        {
            tracing::info!(item_id = %item_id, "auto-labeling qualifying item");
            self.source.add_tag(&item.id, &tag).await?;
            has_tag = true;
        }

        if !(has_tag && !recurring_blocked && !inbox_blocked) {
            return self
                .orphan_transition(message, state, &bundle, has_tag && recurring_blocked)
                .await;
        }

        let mapped = map_item(&bundle, &self.cfg);
        if mapped.truncated_blocks > 0 {
            tracing::warn!(
                item_id = %item_id,
                blocks = mapped.truncated_blocks,
                "body blocks truncated to destination limit"
            );
        }

        let project_page_id = match self.store.get_project(&item.project_id).await? {
            Some(ps) => ps.dest_page_id,
            None => {
                let seeds = self.aggregate_project_areas(&bundle).await?;
                self.resolver.resolve_project(&bundle.project, &seeds).await?
            }
        };
        let area_ids = self.resolver.resolve_areas(&mapped.relations.area_names).await?;
        let person_ids = self
            .resolver
            .resolve_people(&mapped.relations.person_names)
            .await?;
        let resolved = ResolvedRelations {
            project_page_id: Some(project_page_id.clone()),
            area_ids: area_ids.clone(),
            person_ids: person_ids.clone(),
        };

        let hash = payload_hash(&mapped.payload, &resolved);

        if let Some(existing) = &state {
            if let Some(page_id) = existing
                .dest_page_id
                .clone()
                .filter(|_| existing.sync_status == SyncStatus::Ok && existing.payload_hash == hash)
            {
                // Clean hash still has to repair out-of-band drift: a page
                // archived by hand gets unarchived even though no property
                // changed.
                let clean = match self.dest.get_page(&page_id).await {
                    Ok(page) if page.archived => {
                        tracing::info!(item_id = %item_id, page_id = %page_id, "repairing manually archived page");
                        self.dest.unarchive_page(&page_id).await?;
                        true
                    }
                    Ok(_) => true,
                    Err(TmError::NotFound(_)) => false,
                    Err(e) => return Err(e),
                };
                if clean {
                    tracing::debug!(item_id = %item_id, "payload unchanged, skipping write");
                    let id = item.id.clone();
                    let src = message.source;
                    self.store
                        .upsert_task(&item.id, &move |current| {
                            let mut s = current.unwrap_or_else(|| TaskSyncState::new(&id, src));
                            s.last_synced_at = Utc::now();
                            Ok(s)
                        })
                        .await?;
                    return Ok(());
                }
            }
        }

        let mut payload = mapped.payload.clone();
        payload.set("Project", PropertyValue::Relation(vec![project_page_id.clone()]));
        payload.set("AREAS", PropertyValue::Relation(area_ids));
        payload.set("People", PropertyValue::Relation(person_ids));

        let known_page_id = state.as_ref().and_then(|s| s.dest_page_id.clone());
        let first_creation = known_page_id.is_none();
        let page = match known_page_id {
            Some(page_id) => {
                // Repair out-of-band archiving before the update.
                match self.dest.get_page(&page_id).await {
                    Ok(p) if p.archived => self.dest.unarchive_page(&page_id).await?,
                    Ok(_) => {}
                    Err(TmError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                match self.dest.update_page(&page_id, &payload).await {
                    Ok(p) => p,
                    Err(TmError::NotFound(_)) => self.create_or_adopt(&item.id, &payload).await?,
                    Err(e) => return Err(e),
                }
            }
            None => self.create_or_adopt(&item.id, &payload).await?,
        };

        if first_creation && self.cfg.add_backlink {
            self.write_backlinks(&bundle, &page, &project_page_id).await?;
        }

        let id = item.id.clone();
        let src = message.source;
        let page_id = page.id.clone();
        let h = hash.clone();
        self.store
            .upsert_task(&item.id, &move |current| {
                let mut s = current.unwrap_or_else(|| TaskSyncState::new(&id, src));
                s.dest_page_id = Some(page_id.clone());
                s.payload_hash = h.clone();
                s.echo_hash = Some(h.clone());
                s.sync_status = SyncStatus::Ok;
                s.sync_source = src;
                s.was_eligible = true;
                s.last_synced_at = Utc::now();
                s.error_note = None;
                Ok(s)
            })
            .await?;

        tracing::info!(item_id = %item.id, page_id = %page.id, "item synced");
        Ok(())
    }

    /// Create the task page, adopting (and deduplicating) any page that
    /// already carries this external id.
    async fn create_or_adopt(
        &self,
        external_id: &str,
        payload: &tm_core::PagePayload,
    ) -> TmResult<DestPage> {
        let existing = self
            .dest
            .find_by_external_id(PageKind::Task, external_id)
            .await?;
        let mut pages = existing.into_iter();
        match pages.next() {
            Some(canonical) => {
                for duplicate in pages {
                    tracing::warn!(
                        item_id = %external_id,
                        duplicate = %duplicate.id,
                        canonical = %canonical.id,
                        "duplicate destination page, archiving"
                    );
                    if let Err(e) = self.dest.archive_page(&duplicate.id).await {
                        tracing::error!(page_id = %duplicate.id, error = %e, "failed to archive duplicate");
                    }
                }
                if canonical.archived {
                    self.dest.unarchive_page(&canonical.id).await?;
                }
                self.dest.update_page(&canonical.id, payload).await
            }
            None => self.dest.create_page(PageKind::Task, payload).await,
        }
    }

    async fn write_backlinks(
        &self,
        bundle: &SourceItemBundle,
        page: &DestPage,
        project_page_id: &str,
    ) -> TmResult<()> {
        let Some(task_url) = page.url.as_deref() else {
            return Ok(());
        };
        let project_url = match self.dest.get_page(project_page_id).await {
            Ok(p) => p.url.unwrap_or_default(),
            Err(_) => String::new(),
        };
        if let Some(new_description) =
            append_backlinks(&bundle.item.description, task_url, &project_url)
        {
            self.source
                .set_description(&bundle.item.id, &new_description)
                .await?;
        }
        Ok(())
    }

    /// A previously mirrored item no longer passes eligibility: mark the
    /// page with an orphan notice, archive it, and keep the state row.
    async fn orphan_transition(
        &self,
        message: &SyncMessage,
        state: Option<TaskSyncState>,
        bundle: &SourceItemBundle,
        recurring_was_cause: bool,
    ) -> TmResult<()> {
        let item_id = &bundle.item.id;
        let Some(state) = state else {
            tracing::debug!(item_id = %item_id, "ineligible item with no mirror, ignoring");
            return Ok(());
        };
        let page_id = match state.dest_page_id.clone() {
            Some(id) if state.was_eligible => id,
            _ => {
                tracing::debug!(item_id = %item_id, "ineligible item was never mirrored");
                return Ok(());
            }
        };
        let notice = Block::Paragraph(orphan_notice(Utc::now()));
        match self.dest.append_blocks(&page_id, &[notice]).await {
            Ok(()) | Err(TmError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match self.dest.archive_page(&page_id).await {
            Ok(()) | Err(TmError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        if recurring_was_cause {
            tracing::info!(item_id = %item_id, "item became recurring, removing sync tag");
            self.source
                .remove_tag(item_id, &self.cfg.eligibility_tag)
                .await?;
        }

        let src = message.source;
        self.store
            .upsert_task(item_id, &move |current| {
                let mut s = current
                    .ok_or_else(|| TmError::Storage("task state row disappeared".into()))?;
                s.sync_status = SyncStatus::Archived;
                s.sync_source = src;
                s.was_eligible = false;
                s.last_synced_at = Utc::now();
                Ok(s)
            })
            .await?;

        tracing::info!(item_id = %item_id, page_id = %page_id, "mirror orphaned");
        Ok(())
    }

    async fn handle_archive(&self, message: &SyncMessage) -> TmResult<()> {
        self.archive_mirror(message).await
    }

    async fn archive_mirror(&self, message: &SyncMessage) -> TmResult<()> {
        let item_id = &message.source_item_id;
        let Some(state) = self.store.get_task(item_id).await? else {
            tracing::debug!(item_id = %item_id, "no sync state, nothing to archive");
            return Ok(());
        };
        let Some(page_id) = state.dest_page_id.clone() else {
            tracing::debug!(item_id = %item_id, "no destination page, nothing to archive");
            return Ok(());
        };
        if state.sync_status == SyncStatus::Archived {
            return Ok(());
        }

        match self.dest.archive_page(&page_id).await {
            Ok(()) | Err(TmError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let src = message.source;
        self.store
            .upsert_task(item_id, &move |current| {
                let mut s = current
                    .ok_or_else(|| TmError::Storage("task state row disappeared".into()))?;
                s.sync_status = SyncStatus::Archived;
                s.sync_source = src;
                s.was_eligible = false;
                s.last_synced_at = Utc::now();
                Ok(s)
            })
            .await?;

        tracing::info!(item_id = %item_id, page_id = %page_id, "mirror archived");
        Ok(())
    }

    /// Areas aggregated from the project's currently-eligible children, used
    /// to seed a project page at materialization time.
    async fn aggregate_project_areas(&self, bundle: &SourceItemBundle) -> TmResult<Vec<String>> {
        let tagged = self.source.list_tagged(&self.cfg.eligibility_tag).await?;
        let mut names: Vec<String> = Vec::new();
        let siblings = tagged
            .iter()
            .filter(|i| i.project_id == bundle.project.id)
            .map(|i| &i.labels)
            .chain(std::iter::once(&bundle.item.labels));
        for labels in siblings {
            for area in partition_labels(labels, &self.cfg).areas {
                if !names.contains(&area) {
                    names.push(area);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn record_error(&self, item_id: &str, source: SyncSource, error: &TmError) {
        let id = item_id.to_string();
        let note = error.to_string();
        let result = self
            .store
            .upsert_task(item_id, &move |current| {
                let mut s = current.unwrap_or_else(|| TaskSyncState::new(&id, source));
                s.sync_status = SyncStatus::Error;
                s.sync_source = source;
                s.error_note = Some(note.clone());
                s.last_synced_at = Utc::now();
                Ok(s)
            })
            .await;
        if let Err(e) = result {
            tracing::error!(item_id = %item_id, error = %e, "failed to record error state");
        }
    }
}
