//! Forward mapping from a source item bundle to a destination page payload.
//!
//! The transform is pure and deterministic: the same bundle always produces
//! byte-identical canonical JSON, which is what the idempotence hash relies
//! on.

use tm_core::{Block, PagePayload, PropertyValue, SourceComment, SourceItemBundle};

use crate::config::SyncConfig;
use crate::labels::{partition_labels, LabelPartition};

/// Destination paragraph blocks cap out at this many characters; longer text
/// is cut with [`TRUNCATION_MARKER`].
pub const BLOCK_TEXT_LIMIT: usize = 2000;
pub const TRUNCATION_MARKER: &str = "\u{2026} [truncated]";

const EMPTY_TITLE_PLACEHOLDER: &str = "(untitled)";

/// Relation targets the resolver still has to turn into destination ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationRequests {
    pub project_id: String,
    pub area_names: Vec<String>,
    pub person_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MappedItem {
    pub payload: PagePayload,
    pub relations: RelationRequests,
    /// How many body blocks were cut to the destination size limit.
    pub truncated_blocks: usize,
}

/// Source priority 4 is "urgent"; the destination select runs the other way
/// (P1 highest).
pub fn priority_label(priority: u8) -> &'static str {
    match priority {
        4 => "P1",
        3 => "P2",
        2 => "P3",
        _ => "P4",
    }
}

pub fn map_item(bundle: &SourceItemBundle, cfg: &SyncConfig) -> MappedItem {
    let item = &bundle.item;
    let LabelPartition {
        plain,
        areas,
        people,
    } = partition_labels(&item.labels, cfg);

    let title = if item.content.trim().is_empty() {
        tracing::warn!(item_id = %item.id, "item has empty title, using placeholder");
        EMPTY_TITLE_PLACEHOLDER.to_string()
    } else {
        item.content.clone()
    };

    let mut payload = PagePayload::default();
    payload.set("Name", PropertyValue::Title(title));
    payload.set(
        "Priority",
        PropertyValue::Select(Some(priority_label(item.priority).to_string())),
    );
    payload.set("Completed", PropertyValue::Checkbox(item.is_completed));
    payload.set("Todoist Task ID", PropertyValue::Text(item.id.clone()));
    payload.set("Todoist URL", PropertyValue::Url(item.url.clone()));
    payload.set("Labels", PropertyValue::MultiSelect(plain));

    if let Some(due) = &item.due {
        let (date, time) = match due.date.split_once('T') {
            Some((d, t)) => (d.to_string(), Some(t.to_string())),
            None => (due.date.clone(), None),
        };
        // Naive times are interpreted in the configured default timezone.
        let timezone = match (&time, &due.timezone) {
            (Some(_), None) => Some(cfg.default_timezone.clone()),
            _ => due.timezone.clone(),
        };
        payload.set(
            "Due Date",
            PropertyValue::Date {
                start: date,
                time,
                timezone,
            },
        );
    }

    if let Some(section) = &bundle.section_name {
        payload.set("Section", PropertyValue::Select(Some(section.clone())));
    }

    let mut truncated = 0;
    payload.body = build_body(&item.description, &bundle.comments, &mut truncated);

    MappedItem {
        payload,
        relations: RelationRequests {
            project_id: item.project_id.clone(),
            area_names: areas,
            person_names: people,
        },
        truncated_blocks: truncated,
    }
}

fn build_body(description: &str, comments: &[SourceComment], truncated: &mut usize) -> Vec<Block> {
    let mut blocks = Vec::new();
    if !description.trim().is_empty() {
        blocks.push(Block::Paragraph(clamp_block_text(description, truncated)));
    }
    if !comments.is_empty() {
        blocks.push(Block::Heading("Comments".into()));
        for comment in comments {
            blocks.push(Block::Paragraph(clamp_block_text(
                &format_comment(comment),
                truncated,
            )));
        }
    }
    blocks
}

/// `**author** · timestamp`, blank line, then the comment text. Comments
/// without an author name get the generic "Comment" attribution.
fn format_comment(comment: &SourceComment) -> String {
    let author = comment.author.as_deref().unwrap_or("Comment");
    format!(
        "**{author}** \u{b7} {}\n\n{}",
        comment.posted_at, comment.content
    )
}

fn clamp_block_text(text: &str, truncated: &mut usize) -> String {
    if text.chars().count() <= BLOCK_TEXT_LIMIT {
        return text.to_string();
    }
    *truncated += 1;
    tracing::warn!(
        limit = BLOCK_TEXT_LIMIT,
        "block text exceeds destination limit, truncating"
    );
    let keep = BLOCK_TEXT_LIMIT - TRUNCATION_MARKER.chars().count();
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}
