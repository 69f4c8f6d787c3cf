//! Relation resolution: turn (kind, name-or-id) into destination page ids.
//!
//! Creation policy is per kind: areas and people are lookup-only, projects
//! are created exactly once under a per-name single-flight lock. The
//! per-process cache is write-once per name; a concurrent peer's creation is
//! adopted by re-querying inside the critical section.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use tm_core::{
    DestApi, PageKind, PagePayload, ProjectSyncState, PropertyValue, SourceApi, SourceProject,
    StateStore, TmResult,
};

use crate::backlinks::project_backlink_comment;
use crate::config::SyncConfig;
use crate::hash::reverse_intention_hash;
use crate::keyed_lock::KeyedLocks;
use crate::labels::canonical_name;
use crate::people::match_person;

/// Relation ids after resolution, hashed together with the page payload.
/// Arrays are kept sorted so the hash is order-independent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRelations {
    pub project_page_id: Option<String>,
    pub area_ids: Vec<String>,
    pub person_ids: Vec<String>,
}

pub struct Resolver {
    dest: Arc<dyn DestApi>,
    source: Arc<dyn SourceApi>,
    store: Arc<dyn StateStore>,
    cfg: Arc<SyncConfig>,
    cache: RwLock<HashMap<(PageKind, String), String>>,
    locks: KeyedLocks,
}

impl Resolver {
    pub fn new(
        dest: Arc<dyn DestApi>,
        source: Arc<dyn SourceApi>,
        store: Arc<dyn StateStore>,
        cfg: Arc<SyncConfig>,
    ) -> Self {
        Self {
            dest,
            source,
            store,
            cfg,
            cache: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
        }
    }

    /// Look up an area page id by canonical name. Never creates: a miss is
    /// logged and dropped so the sync still succeeds.
    pub async fn resolve_area(&self, name: &str) -> TmResult<Option<String>> {
        let key = (PageKind::Area, canonical_name(name));
        if let Some(id) = self.cache.read().await.get(&key) {
            return Ok(Some(id.clone()));
        }
        match self.dest.find_relation_by_name(PageKind::Area, name).await? {
            Some(id) => {
                self.cache.write().await.insert(key, id.clone());
                Ok(Some(id))
            }
            None => {
                tracing::warn!(area = %name, "area not found in destination, dropping relation");
                Ok(None)
            }
        }
    }

    /// Resolve every area name that exists, dropping misses. The returned
    /// ids are sorted for canonical hashing.
    pub async fn resolve_areas(&self, names: &[String]) -> TmResult<Vec<String>> {
        let mut ids = Vec::new();
        for name in names {
            if let Some(id) = self.resolve_area(name).await? {
                ids.push(id);
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Fuzzy-match person labels against the People database. Ambiguous
    /// labels resolve to nothing.
    pub async fn resolve_people(&self, names: &[String]) -> TmResult<Vec<String>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let people = self.dest.list_people().await?;
        let mut ids: Vec<String> = names
            .iter()
            .filter_map(|name| match_person(name, &people).map(|p| p.id.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Return the destination page id for a source project, materializing
    /// the page exactly once.
    ///
    /// `seed_area_names` are the areas aggregated from the project's
    /// currently-eligible children; they are written only at creation and
    /// frozen afterwards.
    pub async fn resolve_project(
        &self,
        project: &SourceProject,
        seed_area_names: &[String],
    ) -> TmResult<String> {
        if let Some(state) = self.store.get_project(&project.id).await? {
            return Ok(state.dest_page_id);
        }

        let lock_key = format!("project/{}", canonical_name(&project.name));
        let _guard = self.locks.acquire(&lock_key).await;

        // Re-check under the lock: a concurrent worker may have won.
        if let Some(state) = self.store.get_project(&project.id).await? {
            return Ok(state.dest_page_id);
        }

        // A peer process may have created the page between our first miss
        // and the critical section; adopt its page rather than duplicating.
        let existing = self
            .dest
            .find_by_external_id(PageKind::Project, &project.id)
            .await?;
        if let Some(page) = existing.into_iter().next() {
            tracing::info!(project_id = %project.id, page_id = %page.id, "adopting existing project page");
            let state = self.record_project_state(project, &page.id).await?;
            return Ok(state.dest_page_id);
        }

        let area_ids = self.resolve_areas(seed_area_names).await?;
        let page = self.dest.create_page(PageKind::Project, &self.project_payload(project, &area_ids)).await?;
        tracing::info!(
            project_id = %project.id,
            page_id = %page.id,
            areas = area_ids.len(),
            "materialized project page"
        );

        let state = self.record_project_state(project, &page.id).await?;

        if self.cfg.add_backlink {
            if let Some(url) = &page.url {
                self.source
                    .add_project_comment(&project.id, &project_backlink_comment(url))
                    .await?;
            }
        }

        Ok(state.dest_page_id)
    }

    fn project_payload(&self, project: &SourceProject, area_ids: &[String]) -> PagePayload {
        let mut payload = PagePayload::default();
        payload.set("Name", PropertyValue::Title(project.name.clone()));
        payload.set(
            "Todoist Project ID",
            PropertyValue::Text(project.id.clone()),
        );
        payload.set("Todoist URL", PropertyValue::Url(project.url.clone()));
        payload.set(
            "Color",
            PropertyValue::Select(Some(project.color.clone())),
        );
        payload.set("Status", PropertyValue::Select(Some("Active".into())));
        payload.set("AREAS", PropertyValue::Relation(area_ids.to_vec()));
        payload
    }

    async fn record_project_state(
        &self,
        project: &SourceProject,
        page_id: &str,
    ) -> TmResult<ProjectSyncState> {
        let name = project.name.clone();
        let project_id = project.id.clone();
        let page_id = page_id.to_string();
        self.store
            .upsert_project(&project.id, &move |current| {
                // A concurrent upsert may have landed first; keep it.
                if let Some(existing) = current {
                    return Ok(existing);
                }
                let now = Utc::now();
                Ok(ProjectSyncState {
                    source_project_id: project_id.clone(),
                    dest_page_id: page_id.clone(),
                    name_last_written: name.clone(),
                    echo_hash: Some(reverse_intention_hash(&name, false)),
                    created_at: now,
                    areas_frozen_at: Some(now),
                    last_synced_at: now,
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_project, FakeDest, FakeSource};
    use tm_storage::SqliteStateStore;

    fn make_resolver(dest: Arc<FakeDest>, source: Arc<FakeSource>) -> Resolver {
        let store = Arc::new(SqliteStateStore::in_memory("test").unwrap());
        Resolver::new(dest, source, store, Arc::new(SyncConfig::default()))
    }

    #[tokio::test]
    async fn area_lookup_hits_and_caches() {
        let dest = Arc::new(FakeDest::new());
        let work_id = dest.add_area("WORK");
        let resolver = make_resolver(Arc::clone(&dest), Arc::new(FakeSource::new()));

        assert_eq!(resolver.resolve_area("WORK").await.unwrap(), Some(work_id.clone()));
        // Second resolution comes from cache even if the backing row vanishes.
        dest.areas.lock().unwrap().clear();
        assert_eq!(resolver.resolve_area("WORK").await.unwrap(), Some(work_id));
    }

    #[tokio::test]
    async fn unknown_area_is_dropped_not_created() {
        let dest = Arc::new(FakeDest::new());
        let resolver = make_resolver(Arc::clone(&dest), Arc::new(FakeSource::new()));

        assert_eq!(resolver.resolve_area("ZEBRA").await.unwrap(), None);
        assert!(dest.areas.lock().unwrap().is_empty());
        assert!(dest.pages_of_kind(PageKind::Area).is_empty());
    }

    #[tokio::test]
    async fn people_resolution_skips_ambiguous() {
        let dest = Arc::new(FakeDest::new());
        dest.add_person("Doug Diego");
        dest.add_person("Sam Hill");
        dest.add_person("Sam Rivers");
        let resolver = make_resolver(Arc::clone(&dest), Arc::new(FakeSource::new()));

        let ids = resolver
            .resolve_people(&["DougD".into(), "sam".into()])
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn project_created_once_with_seed_areas() {
        let dest = Arc::new(FakeDest::new());
        let work_id = dest.add_area("WORK");
        let source = Arc::new(FakeSource::new());
        let resolver = make_resolver(Arc::clone(&dest), Arc::clone(&source));

        let project = sample_project("P7", "Ops");
        let page_id = resolver
            .resolve_project(&project, &["WORK".into()])
            .await
            .unwrap();

        let pages = dest.pages_of_kind(PageKind::Project);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page.id, page_id);
        assert_eq!(
            pages[0].payload.properties.get("AREAS"),
            Some(&PropertyValue::Relation(vec![work_id]))
        );
        assert_eq!(
            pages[0].payload.properties.get("Status"),
            Some(&PropertyValue::Select(Some("Active".into())))
        );
        // Project backlink comment was posted exactly once.
        assert_eq!(source.project_comments.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_materialization_yields_one_page() {
        let dest = Arc::new(FakeDest::new());
        *dest.create_delay.lock().unwrap() = Some(std::time::Duration::from_millis(10));
        let source = Arc::new(FakeSource::new());
        let resolver = Arc::new(make_resolver(Arc::clone(&dest), Arc::clone(&source)));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let resolver = Arc::clone(&resolver);
            let project = sample_project("P9", "Launch");
            handles.push(tokio::spawn(async move {
                resolver.resolve_project(&project, &[]).await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }

        assert_eq!(dest.pages_of_kind(PageKind::Project).len(), 1);
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn existing_peer_page_is_adopted() {
        let dest = Arc::new(FakeDest::new());
        let source = Arc::new(FakeSource::new());

        // Simulate a peer process having already created the page.
        let mut payload = PagePayload::default();
        payload.set("Name", PropertyValue::Title("Ops".into()));
        payload.set("Todoist Project ID", PropertyValue::Text("P7".into()));
        let peer_page = dest.create_page(PageKind::Project, &payload).await.unwrap();

        let resolver = make_resolver(Arc::clone(&dest), Arc::clone(&source));
        let page_id = resolver
            .resolve_project(&sample_project("P7", "Ops"), &[])
            .await
            .unwrap();

        assert_eq!(page_id, peer_page.id);
        assert_eq!(dest.pages_of_kind(PageKind::Project).len(), 1);
        // Adoption never posts a second backlink comment.
        assert!(source.project_comments.lock().unwrap().is_empty());
    }
}
