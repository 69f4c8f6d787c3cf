use serde::{Deserialize, Serialize};

fn default_priority() -> u8 {
    1
}

/// Due date information attached to a source item.
///
/// `date` is either `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`; the mapper splits
/// the time part out when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDue {
    pub date: String,
    #[serde(default)]
    pub string: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub is_recurring: bool,
}

/// A task snapshot read from the source service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: String,
    /// The task title. The source API calls this `content`.
    pub content: String,
    #[serde(default)]
    pub description: String,
    pub project_id: String,
    #[serde(default)]
    pub section_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// 1 (normal) through 4 (urgent).
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub due: Option<SourceDue>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl SourceItem {
    pub fn is_recurring(&self) -> bool {
        self.due.as_ref().is_some_and(|d| d.is_recurring)
    }

    /// Label check accepting both the bare and `@`-prefixed spellings.
    pub fn has_label(&self, tag: &str) -> bool {
        let prefixed = format!("@{tag}");
        self.labels.iter().any(|l| l == tag || *l == prefixed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub is_inbox_project: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    pub id: String,
    pub name: String,
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceComment {
    pub id: String,
    #[serde(default, alias = "task_id")]
    pub item_id: String,
    pub content: String,
    pub posted_at: String,
    /// Author display name where the API provides one.
    #[serde(default)]
    pub author: Option<String>,
}

/// Everything the mapper needs for one item, fetched in a single adapter call.
#[derive(Debug, Clone)]
pub struct SourceItemBundle {
    pub item: SourceItem,
    pub project: SourceProject,
    pub comments: Vec<SourceComment>,
    pub section_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_with_labels(labels: &[&str]) -> SourceItem {
        SourceItem {
            id: "t1".into(),
            content: "Buy gloves".into(),
            description: String::new(),
            project_id: "p1".into(),
            section_id: None,
            parent_id: None,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            priority: 1,
            due: None,
            url: String::new(),
            created_at: String::new(),
            is_completed: false,
            completed_at: None,
        }
    }

    #[test]
    fn has_label_accepts_both_spellings() {
        assert!(item_with_labels(&["capsync"]).has_label("capsync"));
        assert!(item_with_labels(&["@capsync"]).has_label("capsync"));
        assert!(!item_with_labels(&["work"]).has_label("capsync"));
    }

    #[test]
    fn recurring_flag_comes_from_due() {
        let mut item = item_with_labels(&[]);
        assert!(!item.is_recurring());
        item.due = Some(SourceDue {
            date: "2026-08-01".into(),
            string: "every day".into(),
            timezone: None,
            is_recurring: true,
        });
        assert!(item.is_recurring());
    }

    #[test]
    fn item_deserializes_from_api_shape() {
        let json = r#"{
            "id": "123",
            "content": "Write report",
            "project_id": "p9",
            "priority": 3,
            "labels": ["capsync", "WORK"],
            "due": {"date": "2026-08-05T09:00:00", "string": "Aug 5 9am", "timezone": "America/Los_Angeles", "is_recurring": false},
            "url": "https://todoist.com/showTask?id=123",
            "created_at": "2026-08-01T12:00:00Z",
            "is_completed": false
        }"#;
        let item: SourceItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.priority, 3);
        assert_eq!(item.due.as_ref().unwrap().date, "2026-08-05T09:00:00");
        assert!(item.description.is_empty());
    }
}
