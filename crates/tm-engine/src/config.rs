use serde::{Deserialize, Serialize};

/// The canonical life-area names recognized from labels by default.
pub const DEFAULT_AREA_NAMES: [&str; 7] = [
    "HOME",
    "HEALTH",
    "PROSPER",
    "WORK",
    "PERSONAL & FAMILY",
    "FINANCIAL",
    "FUN",
];

/// Behavior knobs for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// The gating tag. Items without it are not mirrored.
    pub eligibility_tag: String,
    /// Recognized area canonical names (uppercase).
    pub area_names: Vec<String>,
    /// Items in the source Inbox are ineligible.
    pub skip_inbox: bool,
    /// Recurring items are ineligible.
    pub skip_recurring: bool,
    /// The engine may add the gating tag to qualifying items during
    /// reconciliation.
    pub auto_label: bool,
    /// Append destination URLs to the source description on first sync.
    pub add_backlink: bool,
    /// Cron expression for the periodic reconciler.
    pub reconcile_schedule: String,
    pub worker_concurrency: usize,
    pub retry_max: u32,
    pub retry_base_delay_secs: u64,
    /// Used to interpret naive due times.
    pub default_timezone: String,
    pub request_timeout_secs: u64,
    /// State-store namespace prefix, so environments can coexist.
    pub namespace: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            eligibility_tag: "capsync".into(),
            area_names: DEFAULT_AREA_NAMES.iter().map(|s| s.to_string()).collect(),
            skip_inbox: true,
            skip_recurring: true,
            auto_label: true,
            add_backlink: true,
            reconcile_schedule: "0 0 */2 * * *".into(),
            worker_concurrency: 4,
            retry_max: 3,
            retry_base_delay_secs: 1,
            default_timezone: "America/Los_Angeles".into(),
            request_timeout_secs: 30,
            namespace: "todoist-notion-v1".into(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            eligibility_tag: env_string("TM_ELIGIBILITY_TAG", &defaults.eligibility_tag),
            area_names: std::env::var("TM_AREA_NAMES")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_uppercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.area_names),
            skip_inbox: env_bool("TM_SKIP_INBOX", defaults.skip_inbox),
            skip_recurring: env_bool("TM_SKIP_RECURRING", defaults.skip_recurring),
            auto_label: env_bool("TM_AUTO_LABEL", defaults.auto_label),
            add_backlink: env_bool("TM_ADD_BACKLINK", defaults.add_backlink),
            reconcile_schedule: env_string("TM_RECONCILE_SCHEDULE", &defaults.reconcile_schedule),
            worker_concurrency: env_parse("TM_WORKER_CONCURRENCY", defaults.worker_concurrency),
            retry_max: env_parse("TM_RETRY_MAX", defaults.retry_max),
            retry_base_delay_secs: env_parse(
                "TM_RETRY_BASE_DELAY_SECS",
                defaults.retry_base_delay_secs,
            ),
            default_timezone: env_string("TM_DEFAULT_TIMEZONE", &defaults.default_timezone),
            request_timeout_secs: env_parse(
                "TM_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
            namespace: env_string("TM_NAMESPACE", &defaults.namespace),
        }
    }

    /// Whether `name` (already canonicalized) is a recognized area.
    pub fn is_area_name(&self, canonical: &str) -> bool {
        self.area_names.iter().any(|a| a == canonical)
    }
}

/// Connection settings for the source task service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub api_base_url: String,
    pub api_token: String,
}

impl SourceConfig {
    pub fn from_env() -> Self {
        Self {
            api_base_url: env_string("TM_SOURCE_API_BASE_URL", "https://api.todoist.com/rest/v2"),
            api_token: env_string("TM_SOURCE_API_TOKEN", ""),
        }
    }
}

/// Connection settings for the destination knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestConfig {
    pub api_base_url: String,
    pub api_token: String,
    pub tasks_database_id: String,
    pub projects_database_id: String,
    pub areas_database_id: Option<String>,
    pub people_database_id: Option<String>,
}

impl DestConfig {
    pub fn from_env() -> Self {
        Self {
            api_base_url: env_string("TM_DEST_API_BASE_URL", "https://api.notion.com/v1"),
            api_token: env_string("TM_DEST_API_TOKEN", ""),
            tasks_database_id: env_string("TM_DEST_TASKS_DB", ""),
            projects_database_id: env_string("TM_DEST_PROJECTS_DB", ""),
            areas_database_id: env_opt("TM_DEST_AREAS_DB"),
            people_database_id: env_opt("TM_DEST_PEOPLE_DB"),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
