//! In-memory fakes for the adapter traits.
//!
//! Engine and server tests substitute these for the HTTP adapters; they
//! implement the same `tm-core` contracts with plain maps and counters so
//! tests can assert on exactly which writes happened.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use tm_core::{
    Block, DestApi, DestPage, PageKind, PagePayload, PersonRecord, PropertyValue, SourceApi,
    SourceComment, SourceItem, SourceItemBundle, SourceProject, TmError, TmResult,
};

/// Fake source task service.
#[derive(Default)]
pub struct FakeSource {
    pub items: Mutex<HashMap<String, SourceItem>>,
    pub projects: Mutex<HashMap<String, SourceProject>>,
    pub comments: Mutex<HashMap<String, Vec<SourceComment>>>,
    pub sections: Mutex<HashMap<String, String>>,
    /// Recorded `set_description` calls: (item id, new text).
    pub descriptions_set: Mutex<Vec<(String, String)>>,
    /// Recorded project comments: (project id, text).
    pub project_comments: Mutex<Vec<(String, String)>>,
    /// Recorded project renames: (project id, new name).
    pub renames: Mutex<Vec<(String, String)>>,
    /// Recorded archive toggles: (project id, archived).
    pub archive_toggles: Mutex<Vec<(String, bool)>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_item(&self, item: SourceItem) {
        self.items.lock().unwrap().insert(item.id.clone(), item);
    }

    pub fn put_project(&self, project: SourceProject) {
        self.projects
            .lock()
            .unwrap()
            .insert(project.id.clone(), project);
    }

    pub fn item(&self, id: &str) -> Option<SourceItem> {
        self.items.lock().unwrap().get(id).cloned()
    }

    pub fn remove_item(&self, id: &str) {
        self.items.lock().unwrap().remove(id);
    }
}

#[async_trait]
impl SourceApi for FakeSource {
    async fn fetch_item(&self, id: &str) -> TmResult<SourceItemBundle> {
        let item = self
            .item(id)
            .ok_or_else(|| TmError::NotFound(format!("item {id}")))?;
        let project = self.fetch_project(&item.project_id).await?;
        let comments = self
            .comments
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default();
        let section_name = item
            .section_id
            .as_ref()
            .and_then(|sid| self.sections.lock().unwrap().get(sid).cloned());
        Ok(SourceItemBundle {
            item,
            project,
            comments,
            section_name,
        })
    }

    async fn list_tagged(&self, tag: &str) -> TmResult<Vec<SourceItem>> {
        let prefixed = format!("@{tag}");
        let mut items: Vec<SourceItem> = self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.labels.iter().any(|l| l == tag || *l == prefixed))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    async fn fetch_project(&self, id: &str) -> TmResult<SourceProject> {
        self.projects
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| TmError::NotFound(format!("project {id}")))
    }

    async fn fetch_comments(&self, item_id: &str) -> TmResult<Vec<SourceComment>> {
        Ok(self
            .comments
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_section_name(&self, section_id: &str) -> TmResult<Option<String>> {
        Ok(self.sections.lock().unwrap().get(section_id).cloned())
    }

    async fn add_tag(&self, id: &str, tag: &str) -> TmResult<Vec<String>> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(id)
            .ok_or_else(|| TmError::NotFound(format!("item {id}")))?;
        let prefixed = format!("@{tag}");
        if !item.labels.iter().any(|l| l == tag || *l == prefixed) {
            item.labels.push(tag.to_string());
        }
        Ok(item.labels.clone())
    }

    async fn remove_tag(&self, id: &str, tag: &str) -> TmResult<Vec<String>> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(id)
            .ok_or_else(|| TmError::NotFound(format!("item {id}")))?;
        let prefixed = format!("@{tag}");
        item.labels.retain(|l| l != tag && *l != prefixed);
        Ok(item.labels.clone())
    }

    async fn set_description(&self, id: &str, text: &str) -> TmResult<()> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(id)
            .ok_or_else(|| TmError::NotFound(format!("item {id}")))?;
        item.description = text.to_string();
        drop(items);
        self.descriptions_set
            .lock()
            .unwrap()
            .push((id.to_string(), text.to_string()));
        Ok(())
    }

    async fn add_project_comment(&self, project_id: &str, text: &str) -> TmResult<()> {
        self.project_comments
            .lock()
            .unwrap()
            .push((project_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn rename_project(&self, id: &str, name: &str) -> TmResult<()> {
        let mut projects = self.projects.lock().unwrap();
        let project = projects
            .get_mut(id)
            .ok_or_else(|| TmError::NotFound(format!("project {id}")))?;
        project.name = name.to_string();
        drop(projects);
        self.renames
            .lock()
            .unwrap()
            .push((id.to_string(), name.to_string()));
        Ok(())
    }

    async fn set_project_archived(&self, id: &str, archived: bool) -> TmResult<()> {
        let mut projects = self.projects.lock().unwrap();
        let project = projects
            .get_mut(id)
            .ok_or_else(|| TmError::NotFound(format!("project {id}")))?;
        project.is_archived = archived;
        drop(projects);
        self.archive_toggles
            .lock()
            .unwrap()
            .push((id.to_string(), archived));
        Ok(())
    }
}

/// A destination page as stored by [`FakeDest`].
#[derive(Debug, Clone)]
pub struct FakePage {
    pub page: DestPage,
    pub kind: PageKind,
    pub payload: PagePayload,
    pub blocks: Vec<Block>,
    seq: u32,
}

/// Fake destination knowledge base.
#[derive(Default)]
pub struct FakeDest {
    pages: Mutex<HashMap<String, FakePage>>,
    next_seq: AtomicU32,
    pub people: Mutex<Vec<PersonRecord>>,
    /// Area name -> page id. Pre-seeded only; the engine never creates areas.
    pub areas: Mutex<HashMap<String, String>>,
    pub create_count: AtomicU32,
    pub update_count: AtomicU32,
    /// Artificial delay inside `create_page`, to widen race windows in
    /// concurrency tests.
    pub create_delay: Mutex<Option<Duration>>,
    /// When set, create/update calls fail with `Permanent(msg)`.
    pub fail_writes: Mutex<Option<String>>,
}

impl FakeDest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_area(&self, name: &str) -> String {
        let id = format!("area-{}", self.next_seq.fetch_add(1, Ordering::SeqCst));
        self.areas
            .lock()
            .unwrap()
            .insert(name.to_string(), id.clone());
        id
    }

    pub fn add_person(&self, name: &str) -> String {
        let id = format!("person-{}", self.next_seq.fetch_add(1, Ordering::SeqCst));
        self.people.lock().unwrap().push(PersonRecord {
            id: id.clone(),
            name: name.to_string(),
        });
        id
    }

    pub fn page(&self, id: &str) -> Option<FakePage> {
        self.pages.lock().unwrap().get(id).cloned()
    }

    pub fn pages_of_kind(&self, kind: PageKind) -> Vec<FakePage> {
        let mut pages: Vec<FakePage> = self
            .pages
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.kind == kind)
            .cloned()
            .collect();
        pages.sort_by_key(|p| p.seq);
        pages
    }

    /// Flip the archived flag directly, simulating an operator edit.
    pub fn force_archive(&self, id: &str, archived: bool) {
        if let Some(p) = self.pages.lock().unwrap().get_mut(id) {
            p.page.archived = archived;
        }
    }

    /// Rewrite the page title directly, simulating an operator edit.
    pub fn force_title(&self, id: &str, title: &str) {
        if let Some(p) = self.pages.lock().unwrap().get_mut(id) {
            p.page.title = title.to_string();
            p.page.last_edited_at = Some(Utc::now());
        }
    }

    fn check_fail(&self) -> TmResult<()> {
        if let Some(msg) = self.fail_writes.lock().unwrap().clone() {
            return Err(TmError::Permanent(msg));
        }
        Ok(())
    }

    fn text_prop(payload: &PagePayload, name: &str) -> Option<String> {
        match payload.properties.get(name) {
            Some(PropertyValue::Text(t)) => Some(t.clone()),
            _ => None,
        }
    }

    fn refresh_derived(fake: &mut FakePage) {
        if let Some(PropertyValue::Title(t)) = fake.payload.properties.get("Name") {
            fake.page.title = t.clone();
        }
        if let Some(PropertyValue::Select(s)) = fake.payload.properties.get("Status") {
            fake.page.status = s.clone();
        }
        let external = Self::text_prop(&fake.payload, "Todoist Task ID")
            .or_else(|| Self::text_prop(&fake.payload, "Todoist Project ID"));
        if external.is_some() {
            fake.page.external_id = external;
        }
    }
}

#[async_trait]
impl DestApi for FakeDest {
    async fn find_by_external_id(
        &self,
        kind: PageKind,
        source_id: &str,
    ) -> TmResult<Vec<DestPage>> {
        let mut matches: Vec<FakePage> = self
            .pages
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.kind == kind && p.page.external_id.as_deref() == Some(source_id))
            .cloned()
            .collect();
        matches.sort_by_key(|p| p.seq);
        Ok(matches.into_iter().map(|p| p.page).collect())
    }

    async fn create_page(&self, kind: PageKind, payload: &PagePayload) -> TmResult<DestPage> {
        self.check_fail()?;
        let delay = *self.create_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let id = format!("page-{seq}");
        let mut fake = FakePage {
            page: DestPage {
                id: id.clone(),
                archived: false,
                created_at: Some(Utc::now()),
                last_edited_at: Some(Utc::now()),
                title: String::new(),
                status: None,
                external_id: None,
                url: Some(format!("https://dest.example/{id}")),
            },
            kind,
            payload: payload.clone(),
            blocks: payload.body.clone(),
            seq,
        };
        Self::refresh_derived(&mut fake);
        let page = fake.page.clone();
        self.pages.lock().unwrap().insert(id, fake);
        self.create_count.fetch_add(1, Ordering::SeqCst);
        Ok(page)
    }

    async fn update_page(&self, id: &str, payload: &PagePayload) -> TmResult<DestPage> {
        self.check_fail()?;
        let mut pages = self.pages.lock().unwrap();
        let fake = pages
            .get_mut(id)
            .ok_or_else(|| TmError::NotFound(format!("page {id}")))?;
        for (name, value) in &payload.properties {
            fake.payload.properties.insert(name.clone(), value.clone());
        }
        if !payload.body.is_empty() {
            fake.payload.body = payload.body.clone();
            fake.blocks = payload.body.clone();
        }
        fake.page.last_edited_at = Some(Utc::now());
        Self::refresh_derived(fake);
        let page = fake.page.clone();
        drop(pages);
        self.update_count.fetch_add(1, Ordering::SeqCst);
        Ok(page)
    }

    async fn archive_page(&self, id: &str) -> TmResult<()> {
        let mut pages = self.pages.lock().unwrap();
        let fake = pages
            .get_mut(id)
            .ok_or_else(|| TmError::NotFound(format!("page {id}")))?;
        fake.page.archived = true;
        Ok(())
    }

    async fn unarchive_page(&self, id: &str) -> TmResult<()> {
        let mut pages = self.pages.lock().unwrap();
        let fake = pages
            .get_mut(id)
            .ok_or_else(|| TmError::NotFound(format!("page {id}")))?;
        fake.page.archived = false;
        Ok(())
    }

    async fn find_relation_by_name(
        &self,
        kind: PageKind,
        name: &str,
    ) -> TmResult<Option<String>> {
        match kind {
            PageKind::Area => Ok(self.areas.lock().unwrap().get(name).cloned()),
            PageKind::Person => Ok(self
                .people
                .lock()
                .unwrap()
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.id.clone())),
            PageKind::Project | PageKind::Task => Ok(self
                .pages
                .lock()
                .unwrap()
                .values()
                .find(|p| p.kind == kind && p.page.title == name)
                .map(|p| p.page.id.clone())),
        }
    }

    async fn list_people(&self) -> TmResult<Vec<PersonRecord>> {
        Ok(self.people.lock().unwrap().clone())
    }

    async fn query_relation_targets(
        &self,
        page_id: &str,
        relation_field: &str,
    ) -> TmResult<Vec<String>> {
        let pages = self.pages.lock().unwrap();
        let fake = pages
            .get(page_id)
            .ok_or_else(|| TmError::NotFound(format!("page {page_id}")))?;
        match fake.payload.properties.get(relation_field) {
            Some(PropertyValue::Relation(ids)) => Ok(ids.clone()),
            _ => Ok(Vec::new()),
        }
    }

    async fn append_blocks(&self, page_id: &str, blocks: &[Block]) -> TmResult<()> {
        let mut pages = self.pages.lock().unwrap();
        let fake = pages
            .get_mut(page_id)
            .ok_or_else(|| TmError::NotFound(format!("page {page_id}")))?;
        fake.blocks.extend(blocks.iter().cloned());
        Ok(())
    }

    async fn get_page(&self, id: &str) -> TmResult<DestPage> {
        self.page(id)
            .map(|p| p.page)
            .ok_or_else(|| TmError::NotFound(format!("page {id}")))
    }
}

/// A plain source item usable as a test fixture.
pub fn sample_item(id: &str, project_id: &str, labels: &[&str]) -> SourceItem {
    SourceItem {
        id: id.to_string(),
        content: format!("Task {id}"),
        description: String::new(),
        project_id: project_id.to_string(),
        section_id: None,
        parent_id: None,
        labels: labels.iter().map(|s| s.to_string()).collect(),
        priority: 1,
        due: None,
        url: format!("https://todoist.com/showTask?id={id}"),
        created_at: "2026-08-01T00:00:00Z".into(),
        is_completed: false,
        completed_at: None,
    }
}

/// A plain source project usable as a test fixture.
pub fn sample_project(id: &str, name: &str) -> SourceProject {
    SourceProject {
        id: id.to_string(),
        name: name.to_string(),
        color: "blue".into(),
        is_inbox_project: false,
        is_archived: false,
        is_shared: false,
        url: format!("https://todoist.com/app/project/{id}"),
    }
}
