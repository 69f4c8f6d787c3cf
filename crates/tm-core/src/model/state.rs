use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Ok,
    Archived,
    Error,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Archived => "archived",
            Self::Error => "error",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = TmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Self::Ok),
            "archived" => Ok(Self::Archived),
            "error" => Ok(Self::Error),
            other => Err(TmError::InvalidInput(format!("sync status: {other}"))),
        }
    }
}

/// Where a sync message originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSource {
    Webhook,
    Reconciler,
    Manual,
}

impl SyncSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Reconciler => "reconciler",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for SyncSource {
    type Err = TmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(Self::Webhook),
            "reconciler" => Ok(Self::Reconciler),
            "manual" => Ok(Self::Manual),
            other => Err(TmError::InvalidInput(format!("sync source: {other}"))),
        }
    }
}

/// Durable per-item sync record. Rows are never physically deleted; an
/// archived mirror keeps its row for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSyncState {
    pub source_item_id: String,
    pub dest_page_id: Option<String>,
    pub payload_hash: String,
    pub echo_hash: Option<String>,
    pub sync_status: SyncStatus,
    pub sync_source: SyncSource,
    /// Whether the item passed eligibility on its last sync. Drives
    /// orphan-transition detection when it later fails the predicate.
    pub was_eligible: bool,
    pub last_synced_at: DateTime<Utc>,
    pub error_note: Option<String>,
}

impl TaskSyncState {
    pub fn new(source_item_id: &str, source: SyncSource) -> Self {
        Self {
            source_item_id: source_item_id.to_string(),
            dest_page_id: None,
            payload_hash: String::new(),
            echo_hash: None,
            sync_status: SyncStatus::Ok,
            sync_source: source,
            was_eligible: false,
            last_synced_at: Utc::now(),
            error_note: None,
        }
    }
}

/// Durable per-project sync record. `areas_frozen_at` is set exactly once,
/// at creation; the engine never rewrites a project page's areas afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSyncState {
    pub source_project_id: String,
    pub dest_page_id: String,
    /// The project name as last written by the engine, for reverse-edge
    /// comparison.
    pub name_last_written: String,
    pub echo_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub areas_frozen_at: Option<DateTime<Utc>>,
    pub last_synced_at: DateTime<Utc>,
}
