//! The two narrow reverse flows: destination project title → source project
//! name, and destination status select → source archive flag.
//!
//! Both are guarded by echo suppression: the hash of the reverse intention
//! is compared against the `echo_hash` stored after the engine's own last
//! write, so a round-trip of our own forward write never bounces back.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use tm_core::{DestApi, SourceApi, StateStore, TmError, TmResult};

use crate::hash::reverse_intention_hash;

const ARCHIVED_STATUS: &str = "Archived";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReverseOutcome {
    pub renamed: usize,
    pub archive_toggled: usize,
    pub skipped_echo: usize,
}

/// Walk every known project and push destination-side edits back to the
/// source where the destination is strictly newer than the engine's last
/// write.
pub async fn project_reverse_pass(
    store: &Arc<dyn StateStore>,
    source: &Arc<dyn SourceApi>,
    dest: &Arc<dyn DestApi>,
) -> TmResult<ReverseOutcome> {
    let mut outcome = ReverseOutcome::default();

    for state in store.list_projects().await? {
        let page = match dest.get_page(&state.dest_page_id).await {
            Ok(page) => page,
            Err(TmError::NotFound(_)) => {
                tracing::warn!(
                    project_id = %state.source_project_id,
                    page_id = %state.dest_page_id,
                    "project page missing, skipping reverse pass"
                );
                continue;
            }
            Err(e) => return Err(e),
        };

        let proposed_archived =
            page.archived || page.status.as_deref() == Some(ARCHIVED_STATUS);
        let intention = reverse_intention_hash(&page.title, proposed_archived);

        if state.echo_hash.as_deref() == Some(intention.as_str()) {
            outcome.skipped_echo += 1;
            continue;
        }

        // Only destination edits that strictly post-date our last write win.
        let dest_is_newer = page
            .last_edited_at
            .map(|edited| edited > state.last_synced_at)
            .unwrap_or(false);
        if !dest_is_newer {
            continue;
        }

        let project = match source.fetch_project(&state.source_project_id).await {
            Ok(p) => p,
            Err(TmError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        };

        let mut wrote = false;
        if !page.title.is_empty() && page.title != project.name {
            tracing::info!(
                project_id = %state.source_project_id,
                from = %project.name,
                to = %page.title,
                "reverse-renaming source project"
            );
            source
                .rename_project(&state.source_project_id, &page.title)
                .await?;
            outcome.renamed += 1;
            wrote = true;
        }
        if proposed_archived != project.is_archived {
            tracing::info!(
                project_id = %state.source_project_id,
                archived = proposed_archived,
                "reverse-toggling source project archive flag"
            );
            source
                .set_project_archived(&state.source_project_id, proposed_archived)
                .await?;
            outcome.archive_toggled += 1;
            wrote = true;
        }

        if wrote {
            let title = page.title.clone();
            let intention = intention.clone();
            store
                .upsert_project(&state.source_project_id, &move |current| {
                    let mut s = current.expect("project state exists");
                    s.name_last_written = title.clone();
                    s.echo_hash = Some(intention.clone());
                    s.last_synced_at = Utc::now();
                    Ok(s)
                })
                .await?;
        }
    }

    Ok(outcome)
}
