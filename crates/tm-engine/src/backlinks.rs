//! Backlink text inserted into source items on first sync, plus the orphan
//! notice appended when a mirror loses eligibility.

use chrono::{DateTime, Utc};

/// Append the destination task and project URLs to a source description,
/// separated from the original text by `---`. Returns `None` when the
/// description already contains the task URL (double-append guard).
pub fn append_backlinks(
    description: &str,
    task_page_url: &str,
    project_page_url: &str,
) -> Option<String> {
    if description.contains(task_page_url) {
        return None;
    }
    let block = format!("---\n{task_page_url}\n{project_page_url}");
    if description.trim().is_empty() {
        Some(block)
    } else {
        Some(format!("{description}\n\n{block}"))
    }
}

/// One-time comment appended to the source project after materialization.
pub fn project_backlink_comment(project_page_url: &str) -> String {
    format!("Mirrored to {project_page_url}")
}

/// Body block recording when the sync label was removed.
pub fn orphan_notice(at: DateTime<Utc>) -> String {
    format!("Sync label was removed on {}", at.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_after_existing_description() {
        let out = append_backlinks("Buy the blue ones", "https://n/task", "https://n/proj")
            .unwrap();
        assert_eq!(out, "Buy the blue ones\n\n---\nhttps://n/task\nhttps://n/proj");
    }

    #[test]
    fn empty_description_gets_bare_block() {
        let out = append_backlinks("", "https://n/task", "https://n/proj").unwrap();
        assert_eq!(out, "---\nhttps://n/task\nhttps://n/proj");
    }

    #[test]
    fn double_append_is_guarded() {
        let once = append_backlinks("desc", "https://n/task", "https://n/proj").unwrap();
        assert!(append_backlinks(&once, "https://n/task", "https://n/proj").is_none());
    }

    #[test]
    fn orphan_notice_contains_date() {
        let at = "2026-08-02T15:04:05Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(orphan_notice(at), "Sync label was removed on 2026-08-02");
    }
}
