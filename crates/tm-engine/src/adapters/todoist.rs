//! REST adapter for the source task service (Todoist REST v2 shapes).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use tm_core::{
    SourceApi, SourceComment, SourceItem, SourceItemBundle, SourceProject, SourceSection,
    TmError, TmResult,
};

use super::{classify_status, classify_transport, throttle};
use crate::config::{SourceConfig, SyncConfig};
use crate::rate_limit::RateLimiter;
use crate::retry::{with_retries, RetryPolicy};

const LIMITER_KEY: &str = "source";

pub struct TodoistAdapter {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl TodoistAdapter {
    pub fn new(
        config: &SourceConfig,
        sync_cfg: &SyncConfig,
        limiter: Arc<RateLimiter>,
    ) -> TmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(sync_cfg.request_timeout_secs))
            .build()
            .map_err(|e| TmError::Config(format!("source http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            limiter,
            retry: RetryPolicy::new(sync_cfg.retry_max, sync_cfg.retry_base_delay_secs),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> TmResult<Value> {
        with_retries(self.retry, || self.request_once(reqwest::Method::GET, path, query, None))
            .await
    }

    async fn post(&self, path: &str, body: Value) -> TmResult<Value> {
        with_retries(self.retry, || {
            self.request_once(reqwest::Method::POST, path, &[], Some(body.clone()))
        })
        .await
    }

    async fn request_once(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> TmResult<Value> {
        throttle(&self.limiter, LIMITER_KEY).await?;
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.api_token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        tracing::debug!(path = %path, "source request");
        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(e, path))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, path));
        }
        let text = response
            .text()
            .await
            .map_err(|e| classify_transport(e, path))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(TmError::from)
    }
}

#[async_trait]
impl SourceApi for TodoistAdapter {
    async fn fetch_item(&self, id: &str) -> TmResult<SourceItemBundle> {
        let item: SourceItem =
            serde_json::from_value(self.get(&format!("/tasks/{id}"), &[]).await?)?;
        let project = self.fetch_project(&item.project_id).await?;
        let comments = self.fetch_comments(id).await?;
        let section_name = match &item.section_id {
            Some(sid) => self.fetch_section_name(sid).await?,
            None => None,
        };
        Ok(SourceItemBundle {
            item,
            project,
            comments,
            section_name,
        })
    }

    async fn list_tagged(&self, tag: &str) -> TmResult<Vec<SourceItem>> {
        let active: Vec<SourceItem> = serde_json::from_value(self.get("/tasks", &[]).await?)?;

        // Completed items are listed best-effort: older API revisions do not
        // expose the endpoint, which must not fail the whole pass.
        let completed: Vec<SourceItem> = match self.get("/tasks/completed", &[]).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(TmError::NotFound(_)) | Err(TmError::Permanent(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        let prefixed = format!("@{tag}");
        let mut items: Vec<SourceItem> = active
            .into_iter()
            .chain(completed)
            .filter(|i| i.labels.iter().any(|l| l == tag || *l == prefixed))
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items.dedup_by(|a, b| a.id == b.id);
        Ok(items)
    }

    async fn fetch_project(&self, id: &str) -> TmResult<SourceProject> {
        let value = self.get(&format!("/projects/{id}"), &[]).await?;
        serde_json::from_value(value).map_err(TmError::from)
    }

    async fn fetch_comments(&self, item_id: &str) -> TmResult<Vec<SourceComment>> {
        let value = self.get("/comments", &[("task_id", item_id)]).await?;
        serde_json::from_value(value).map_err(TmError::from)
    }

    async fn fetch_section_name(&self, section_id: &str) -> TmResult<Option<String>> {
        match self.get(&format!("/sections/{section_id}"), &[]).await {
            Ok(value) => {
                let section: SourceSection = serde_json::from_value(value)?;
                Ok(Some(section.name))
            }
            Err(TmError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn add_tag(&self, id: &str, tag: &str) -> TmResult<Vec<String>> {
        let item: SourceItem =
            serde_json::from_value(self.get(&format!("/tasks/{id}"), &[]).await?)?;
        if item.has_label(tag) {
            return Ok(item.labels);
        }
        let mut labels = item.labels;
        labels.push(tag.to_string());
        self.post(&format!("/tasks/{id}"), json!({ "labels": labels }))
            .await?;
        Ok(labels)
    }

    async fn remove_tag(&self, id: &str, tag: &str) -> TmResult<Vec<String>> {
        let item: SourceItem =
            serde_json::from_value(self.get(&format!("/tasks/{id}"), &[]).await?)?;
        if !item.has_label(tag) {
            return Ok(item.labels);
        }
        let prefixed = format!("@{tag}");
        let labels: Vec<String> = item
            .labels
            .into_iter()
            .filter(|l| l != tag && *l != prefixed)
            .collect();
        self.post(&format!("/tasks/{id}"), json!({ "labels": labels }))
            .await?;
        Ok(labels)
    }

    async fn set_description(&self, id: &str, text: &str) -> TmResult<()> {
        self.post(&format!("/tasks/{id}"), json!({ "description": text }))
            .await?;
        Ok(())
    }

    async fn add_project_comment(&self, project_id: &str, text: &str) -> TmResult<()> {
        self.post(
            "/comments",
            json!({ "project_id": project_id, "content": text }),
        )
        .await?;
        Ok(())
    }

    async fn rename_project(&self, id: &str, name: &str) -> TmResult<()> {
        self.post(&format!("/projects/{id}"), json!({ "name": name }))
            .await?;
        Ok(())
    }

    async fn set_project_archived(&self, id: &str, archived: bool) -> TmResult<()> {
        let verb = if archived { "archive" } else { "unarchive" };
        self.post(&format!("/projects/{id}/{verb}"), json!({}))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn adapter(base_url: &str) -> TodoistAdapter {
        let config = SourceConfig {
            api_base_url: base_url.to_string(),
            api_token: "test-token".into(),
        };
        let sync_cfg = SyncConfig {
            retry_max: 1,
            retry_base_delay_secs: 0,
            ..SyncConfig::default()
        };
        TodoistAdapter::new(&config, &sync_cfg, Arc::new(RateLimiter::new())).unwrap()
    }

    fn task_json(id: &str, labels: &[&str]) -> serde_json::Value {
        json!({
            "id": id,
            "content": format!("Task {id}"),
            "description": "",
            "project_id": "p1",
            "labels": labels,
            "priority": 1,
            "url": format!("https://todoist.com/showTask?id={id}"),
            "created_at": "2026-08-01T00:00:00Z",
            "is_completed": false
        })
    }

    #[tokio::test]
    async fn fetch_item_assembles_bundle() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tasks/t1")
            .with_status(200)
            .with_body(task_json("t1", &["capsync"]).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/projects/p1")
            .with_status(200)
            .with_body(
                json!({"id": "p1", "name": "Ops", "color": "blue", "url": "https://todoist.com/app/project/p1"})
                    .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/comments")
            .match_query(Matcher::UrlEncoded("task_id".into(), "t1".into()))
            .with_status(200)
            .with_body(
                json!([{"id": "c1", "task_id": "t1", "content": "hi", "posted_at": "2026-08-01T10:00:00Z"}])
                    .to_string(),
            )
            .create_async()
            .await;

        let bundle = adapter(&server.url()).fetch_item("t1").await.unwrap();
        assert_eq!(bundle.item.id, "t1");
        assert_eq!(bundle.project.name, "Ops");
        assert_eq!(bundle.comments.len(), 1);
        assert_eq!(bundle.comments[0].item_id, "t1");
    }

    #[tokio::test]
    async fn missing_item_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tasks/ghost")
            .with_status(404)
            .create_async()
            .await;

        let err = adapter(&server.url()).fetch_item("ghost").await.unwrap_err();
        assert!(matches!(err, TmError::NotFound(_)));
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tasks/t1")
            .with_status(503)
            .expect_at_least(1)
            .create_async()
            .await;

        let err = adapter(&server.url()).fetch_item("t1").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn auth_errors_are_typed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tasks/t1")
            .with_status(401)
            .create_async()
            .await;

        let err = adapter(&server.url()).fetch_item("t1").await.unwrap_err();
        assert!(matches!(err, TmError::Auth(_)));
    }

    #[tokio::test]
    async fn add_tag_is_idempotent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tasks/t1")
            .with_status(200)
            .with_body(task_json("t1", &["capsync"]).to_string())
            .create_async()
            .await;
        // No POST mock: an update request would fail the test.

        let labels = adapter(&server.url()).add_tag("t1", "capsync").await.unwrap();
        assert_eq!(labels, vec!["capsync"]);
    }

    #[tokio::test]
    async fn add_tag_posts_when_missing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tasks/t1")
            .with_status(200)
            .with_body(task_json("t1", &["work"]).to_string())
            .create_async()
            .await;
        let update = server
            .mock("POST", "/tasks/t1")
            .match_body(Matcher::JsonString(
                json!({"labels": ["work", "capsync"]}).to_string(),
            ))
            .with_status(204)
            .create_async()
            .await;

        let labels = adapter(&server.url()).add_tag("t1", "capsync").await.unwrap();
        assert_eq!(labels, vec!["work", "capsync"]);
        update.assert_async().await;
    }

    #[tokio::test]
    async fn list_tagged_filters_both_spellings() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tasks")
            .with_status(200)
            .with_body(
                json!([
                    task_json("a", &["capsync"]),
                    task_json("b", &["@capsync"]),
                    task_json("c", &["other"]),
                ])
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/tasks/completed")
            .with_status(404)
            .create_async()
            .await;

        let items = adapter(&server.url()).list_tagged("capsync").await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn list_tagged_merges_completed_items() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tasks")
            .with_status(200)
            .with_body(json!([task_json("a", &["capsync"])]).to_string())
            .create_async()
            .await;
        let mut done = task_json("z", &["capsync"]);
        done["is_completed"] = json!(true);
        server
            .mock("GET", "/tasks/completed")
            .with_status(200)
            .with_body(json!([done]).to_string())
            .create_async()
            .await;

        let items = adapter(&server.url()).list_tagged("capsync").await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().any(|i| i.is_completed));
    }

    #[tokio::test]
    async fn missing_section_resolves_to_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/sections/s9")
            .with_status(404)
            .create_async()
            .await;

        let name = adapter(&server.url()).fetch_section_name("s9").await.unwrap();
        assert!(name.is_none());
    }
}
