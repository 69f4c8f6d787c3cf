use std::sync::Arc;

use tm_engine::{Reconciler, SyncConfig, SyncQueue, SyncWorker};

/// Shared application state behind the REST surface.
pub struct AppState {
    pub cfg: Arc<SyncConfig>,
    pub queue: Arc<SyncQueue>,
    pub worker: Arc<SyncWorker>,
    pub reconciler: Arc<Reconciler>,
    /// Shared secret for webhook HMAC verification. Unset skips the check
    /// (local development).
    pub webhook_secret: Option<String>,
    /// Bearer token guarding the reconcile trigger.
    pub reconcile_token: Option<String>,
}

impl AppState {
    pub fn new(
        cfg: Arc<SyncConfig>,
        queue: Arc<SyncQueue>,
        worker: Arc<SyncWorker>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            cfg,
            queue,
            worker,
            reconciler,
            webhook_secret: std::env::var("TM_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            reconcile_token: std::env::var("TM_RECONCILE_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret;
        self
    }

    pub fn with_reconcile_token(mut self, token: Option<String>) -> Self {
        self.reconcile_token = token;
        self
    }
}
