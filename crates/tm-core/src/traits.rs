use async_trait::async_trait;

use crate::error::TmResult;
use crate::model::*;

/// Narrow façade over the source task service.
///
/// Implementations hide the wire protocol, classify HTTP failures into the
/// `TmError` taxonomy, and retry retryable failures internally before
/// propagating.
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// Fetch one item with its project, comments, and section name.
    /// `TmError::NotFound` means the item was deleted at the source.
    async fn fetch_item(&self, id: &str) -> TmResult<SourceItemBundle>;

    /// All items carrying `tag` (either spelling), including completed ones.
    async fn list_tagged(&self, tag: &str) -> TmResult<Vec<SourceItem>>;

    async fn fetch_project(&self, id: &str) -> TmResult<SourceProject>;

    /// Comments for one item, oldest first. Used when an inline snapshot
    /// makes the full `fetch_item` round trip unnecessary.
    async fn fetch_comments(&self, item_id: &str) -> TmResult<Vec<SourceComment>>;

    /// Section display name, or `None` when the section is gone.
    async fn fetch_section_name(&self, section_id: &str) -> TmResult<Option<String>>;

    /// Idempotent; returns the resulting label set.
    async fn add_tag(&self, id: &str, tag: &str) -> TmResult<Vec<String>>;

    /// Idempotent; returns the resulting label set.
    async fn remove_tag(&self, id: &str, tag: &str) -> TmResult<Vec<String>>;

    /// Replace the item description (backlinks, orphan notices).
    async fn set_description(&self, id: &str, text: &str) -> TmResult<()>;

    /// Append a comment to a project (one-time project backlink).
    async fn add_project_comment(&self, project_id: &str, text: &str) -> TmResult<()>;

    /// Reverse edge: rename a project at the source.
    async fn rename_project(&self, id: &str, name: &str) -> TmResult<()>;

    /// Reverse edge: archive or unarchive a project at the source.
    async fn set_project_archived(&self, id: &str, archived: bool) -> TmResult<()>;
}

/// Narrow façade over the destination knowledge base.
#[async_trait]
pub trait DestApi: Send + Sync {
    /// Pages whose external-id property equals `source_id`, oldest first.
    /// More than one entry signals a duplicate the engine must repair.
    async fn find_by_external_id(&self, kind: PageKind, source_id: &str)
        -> TmResult<Vec<DestPage>>;

    async fn create_page(&self, kind: PageKind, payload: &PagePayload) -> TmResult<DestPage>;

    async fn update_page(&self, id: &str, payload: &PagePayload) -> TmResult<DestPage>;

    async fn archive_page(&self, id: &str) -> TmResult<()>;

    async fn unarchive_page(&self, id: &str) -> TmResult<()>;

    /// Look up a relation target (area / person / project) by exact name.
    async fn find_relation_by_name(&self, kind: PageKind, name: &str)
        -> TmResult<Option<String>>;

    /// The full People database, paginated internally. Fuzzy matching is
    /// client-side.
    async fn list_people(&self) -> TmResult<Vec<PersonRecord>>;

    /// Ids currently linked through a relation property of a page.
    async fn query_relation_targets(
        &self,
        page_id: &str,
        relation_field: &str,
    ) -> TmResult<Vec<String>>;

    async fn append_blocks(&self, page_id: &str, blocks: &[Block]) -> TmResult<()>;

    async fn get_page(&self, id: &str) -> TmResult<DestPage>;
}

/// Mutator applied to a task row inside the store's transaction.
pub type TaskMutator<'a> =
    &'a (dyn Fn(Option<TaskSyncState>) -> TmResult<TaskSyncState> + Send + Sync);

/// Mutator applied to a project row inside the store's transaction.
pub type ProjectMutator<'a> =
    &'a (dyn Fn(Option<ProjectSyncState>) -> TmResult<ProjectSyncState> + Send + Sync);

/// Filter for reconciler scans over task rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStateFilter {
    pub status: Option<SyncStatus>,
}

/// Durable key-value store for sync state.
///
/// Per-key operations are atomic: the mutator runs inside a transaction and
/// a failed mutator leaves the previous row unchanged. No cross-key
/// transactions are offered or needed.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_task(&self, source_item_id: &str) -> TmResult<Option<TaskSyncState>>;

    async fn upsert_task(
        &self,
        source_item_id: &str,
        mutate: TaskMutator<'_>,
    ) -> TmResult<TaskSyncState>;

    async fn list_tasks(&self, filter: TaskStateFilter) -> TmResult<Vec<TaskSyncState>>;

    async fn get_project(&self, source_project_id: &str) -> TmResult<Option<ProjectSyncState>>;

    async fn upsert_project(
        &self,
        source_project_id: &str,
        mutate: ProjectMutator<'_>,
    ) -> TmResult<ProjectSyncState>;

    async fn list_projects(&self) -> TmResult<Vec<ProjectSyncState>>;
}
