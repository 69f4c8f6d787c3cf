//! REST adapter for the destination knowledge base (Notion API shapes).
//!
//! Translates the engine's tagged `PropertyValue` / `Block` payloads into
//! the destination's property and block JSON, and reduces pages read back
//! into the narrow `DestPage` record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use tm_core::{
    Block, DestApi, DestPage, PageKind, PagePayload, PersonRecord, PropertyValue, TmError,
    TmResult,
};

use super::{classify_status, classify_transport, throttle};
use crate::config::{DestConfig, SyncConfig};
use crate::rate_limit::RateLimiter;
use crate::retry::{with_retries, RetryPolicy};

const LIMITER_KEY: &str = "dest";
const API_VERSION: &str = "2022-06-28";
const QUERY_PAGE_SIZE: u32 = 100;

pub struct NotionAdapter {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    config: DestConfig,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl NotionAdapter {
    pub fn new(
        config: &DestConfig,
        sync_cfg: &SyncConfig,
        limiter: Arc<RateLimiter>,
    ) -> TmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(sync_cfg.request_timeout_secs))
            .build()
            .map_err(|e| TmError::Config(format!("dest http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            config: config.clone(),
            limiter,
            retry: RetryPolicy::new(sync_cfg.retry_max, sync_cfg.retry_base_delay_secs),
        })
    }

    fn database_id(&self, kind: PageKind) -> Option<&str> {
        match kind {
            PageKind::Task => Some(&self.config.tasks_database_id),
            PageKind::Project => Some(&self.config.projects_database_id),
            PageKind::Area => self.config.areas_database_id.as_deref(),
            PageKind::Person => self.config.people_database_id.as_deref(),
        }
    }

    fn external_id_property(kind: PageKind) -> &'static str {
        match kind {
            PageKind::Project => "Todoist Project ID",
            _ => "Todoist Task ID",
        }
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> TmResult<Value> {
        with_retries(self.retry, || {
            self.request_once(method.clone(), path, body.clone())
        })
        .await
    }

    async fn request_once(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> TmResult<Value> {
        throttle(&self.limiter, LIMITER_KEY).await?;
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.api_token)
            .header("Notion-Version", API_VERSION);
        if let Some(body) = body {
            request = request.json(&body);
        }

        tracing::debug!(path = %path, "dest request");
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

    fn properties_json(payload: &PagePayload) -> Value {
        let mut props = serde_json::Map::new();
        for (name, value) in &payload.properties {
            props.insert(name.clone(), property_json(value));
        }
        Value::Object(props)
    }

    fn blocks_json(blocks: &[Block]) -> Value {
        Value::Array(blocks.iter().map(block_json).collect())
    }
}

fn property_json(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Title(text) => json!({"title": [{"text": {"content": text}}]}),
        PropertyValue::Select(Some(name)) => json!({"select": {"name": name}}),
        PropertyValue::Select(None) => json!({"select": null}),
        PropertyValue::MultiSelect(names) => json!({
            "multi_select": names.iter().map(|n| json!({"name": n})).collect::<Vec<_>>()
        }),
        PropertyValue::Date {
            start,
            time,
            timezone,
        } => {
            let start = match time {
                Some(t) => format!("{start}T{t}"),
                None => start.clone(),
            };
            let mut date = serde_json::Map::new();
            date.insert("start".into(), json!(start));
            if let Some(tz) = timezone {
                date.insert("time_zone".into(), json!(tz));
            }
            json!({"date": Value::Object(date)})
        }
        PropertyValue::Checkbox(checked) => json!({"checkbox": checked}),
        PropertyValue::Relation(ids) => json!({
            "relation": ids.iter().map(|id| json!({"id": id})).collect::<Vec<_>>()
        }),
        PropertyValue::Text(text) => json!({"rich_text": [{"text": {"content": text}}]}),
        PropertyValue::Url(url) => {
            if url.is_empty() {
                json!({"url": null})
            } else {
                json!({"url": url})
            }
        }
    }
}

fn block_json(block: &Block) -> Value {
    match block {
        Block::Paragraph(text) => json!({
            "object": "block",
            "type": "paragraph",
            "paragraph": {"rich_text": [{"type": "text", "text": {"content": text}}]}
        }),
        Block::Heading(text) => json!({
            "object": "block",
            "type": "heading_2",
            "heading_2": {"rich_text": [{"type": "text", "text": {"content": text}}]}
        }),
    }
}

fn rich_text_content(prop: &Value, field: &str) -> Option<String> {
    prop.get(field)?
        .as_array()?
        .first()?
        .get("text")
        .and_then(|t| t.get("content"))
        .or_else(|| prop.get(field)?.as_array()?.first()?.get("plain_text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_ts(value: &Value, field: &str) -> Option<DateTime<Utc>> {
    value
        .get(field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Reduce a raw page object to the fields the engine reads.
fn parse_page(value: &Value) -> DestPage {
    let props = value.get("properties").cloned().unwrap_or(Value::Null);

    let title = props
        .get("Name")
        .and_then(|p| rich_text_content(p, "title"))
        .unwrap_or_default();
    let status = props
        .get("Status")
        .and_then(|p| p.get("select"))
        .and_then(|s| s.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let external_id = props
        .get("Todoist Task ID")
        .and_then(|p| rich_text_content(p, "rich_text"))
        .or_else(|| {
            props
                .get("Todoist Project ID")
                .and_then(|p| rich_text_content(p, "rich_text"))
        });

    DestPage {
        id: value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        archived: value
            .get("archived")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        created_at: parse_ts(value, "created_time"),
        last_edited_at: parse_ts(value, "last_edited_time"),
        title,
        status,
        external_id,
        url: value
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

#[async_trait]
impl DestApi for NotionAdapter {
    async fn find_by_external_id(
        &self,
        kind: PageKind,
        source_id: &str,
    ) -> TmResult<Vec<DestPage>> {
        let Some(db) = self.database_id(kind) else {
            return Ok(Vec::new());
        };
        let body = json!({
            "filter": {
                "property": Self::external_id_property(kind),
                "rich_text": {"equals": source_id}
            }
        });
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/databases/{db}/query"),
                Some(body),
            )
            .await?;
        let mut pages: Vec<DestPage> = response
            .get("results")
            .and_then(Value::as_array)
            .map(|results| results.iter().map(parse_page).collect())
            .unwrap_or_default();
        pages.sort_by_key(|p| p.created_at);
        Ok(pages)
    }

    async fn create_page(&self, kind: PageKind, payload: &PagePayload) -> TmResult<DestPage> {
        let db = self.database_id(kind).ok_or_else(|| {
            TmError::Config(format!("no database configured for {}", kind.as_str()))
        })?;
        let body = json!({
            "parent": {"database_id": db},
            "properties": Self::properties_json(payload),
        });
        let response = self
            .request(reqwest::Method::POST, "/pages", Some(body))
            .await?;
        let page = parse_page(&response);

        if !payload.body.is_empty() {
            self.append_blocks(&page.id, &payload.body).await?;
        }
        Ok(page)
    }

    async fn update_page(&self, id: &str, payload: &PagePayload) -> TmResult<DestPage> {
        let body = json!({"properties": Self::properties_json(payload)});
        let response = self
            .request(reqwest::Method::PATCH, &format!("/pages/{id}"), Some(body))
            .await?;
        Ok(parse_page(&response))
    }

    async fn archive_page(&self, id: &str) -> TmResult<()> {
        self.request(
            reqwest::Method::PATCH,
            &format!("/pages/{id}"),
            Some(json!({"archived": true})),
        )
        .await?;
        Ok(())
    }

    async fn unarchive_page(&self, id: &str) -> TmResult<()> {
        self.request(
            reqwest::Method::PATCH,
            &format!("/pages/{id}"),
            Some(json!({"archived": false})),
        )
        .await?;
        Ok(())
    }

    async fn find_relation_by_name(
        &self,
        kind: PageKind,
        name: &str,
    ) -> TmResult<Option<String>> {
        let Some(db) = self.database_id(kind) else {
            return Ok(None);
        };
        let body = json!({
            "filter": {"property": "Name", "title": {"equals": name}}
        });
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/databases/{db}/query"),
                Some(body),
            )
            .await?;
        Ok(response
            .get("results")
            .and_then(Value::as_array)
            .and_then(|r| r.first())
            .and_then(|page| page.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn list_people(&self) -> TmResult<Vec<PersonRecord>> {
        let Some(db) = self.database_id(PageKind::Person) else {
            return Ok(Vec::new());
        };
        let path = format!("/databases/{db}/query");
        let mut people = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = serde_json::Map::new();
            body.insert("page_size".into(), json!(QUERY_PAGE_SIZE));
            if let Some(c) = &cursor {
                body.insert("start_cursor".into(), json!(c));
            }
            let response = self
                .request(reqwest::Method::POST, &path, Some(Value::Object(body)))
                .await?;

            if let Some(results) = response.get("results").and_then(Value::as_array) {
                for page in results {
                    let name = page
                        .get("properties")
                        .and_then(|p| p.get("Name"))
                        .and_then(|p| rich_text_content(p, "title"));
                    let id = page.get("id").and_then(Value::as_str);
                    if let (Some(id), Some(name)) = (id, name) {
                        people.push(PersonRecord {
                            id: id.to_string(),
                            name,
                        });
                    }
                }
            }

            let has_more = response
                .get("has_more")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !has_more {
                break;
            }
            cursor = response
                .get("next_cursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }
        Ok(people)
    }

    async fn query_relation_targets(
        &self,
        page_id: &str,
        relation_field: &str,
    ) -> TmResult<Vec<String>> {
        let response = self
            .request(reqwest::Method::GET, &format!("/pages/{page_id}"), None)
            .await?;
        Ok(response
            .get("properties")
            .and_then(|p| p.get(relation_field))
            .and_then(|p| p.get("relation"))
            .and_then(Value::as_array)
            .map(|rels| {
                rels.iter()
                    .filter_map(|r| r.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_blocks(&self, page_id: &str, blocks: &[Block]) -> TmResult<()> {
        if blocks.is_empty() {
            return Ok(());
        }
        self.request(
            reqwest::Method::PATCH,
            &format!("/blocks/{page_id}/children"),
            Some(json!({"children": Self::blocks_json(blocks)})),
        )
        .await?;
        Ok(())
    }

    async fn get_page(&self, id: &str) -> TmResult<DestPage> {
        let response = self
            .request(reqwest::Method::GET, &format!("/pages/{id}"), None)
            .await?;
        Ok(parse_page(&response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn adapter(base_url: &str) -> NotionAdapter {
        let config = DestConfig {
            api_base_url: base_url.to_string(),
            api_token: "secret".into(),
            tasks_database_id: "db-tasks".into(),
            projects_database_id: "db-projects".into(),
            areas_database_id: Some("db-areas".into()),
            people_database_id: Some("db-people".into()),
        };
        let sync_cfg = SyncConfig {
            retry_max: 1,
            retry_base_delay_secs: 0,
            ..SyncConfig::default()
        };
        NotionAdapter::new(&config, &sync_cfg, Arc::new(RateLimiter::new())).unwrap()
    }

    fn page_json(id: &str, title: &str) -> Value {
        json!({
            "id": id,
            "archived": false,
            "created_time": "2026-08-01T00:00:00.000Z",
            "last_edited_time": "2026-08-01T00:00:00.000Z",
            "url": format!("https://notion.example/{id}"),
            "properties": {
                "Name": {"title": [{"text": {"content": title}}]},
                "Todoist Task ID": {"rich_text": [{"text": {"content": "t1"}}]},
                "Status": {"select": {"name": "Active"}}
            }
        })
    }

    #[test]
    fn property_json_shapes() {
        assert_eq!(
            property_json(&PropertyValue::Select(Some("P1".into()))),
            json!({"select": {"name": "P1"}})
        );
        assert_eq!(
            property_json(&PropertyValue::MultiSelect(vec!["a".into()])),
            json!({"multi_select": [{"name": "a"}]})
        );
        assert_eq!(
            property_json(&PropertyValue::Date {
                start: "2026-08-05".into(),
                time: Some("09:00:00".into()),
                timezone: Some("America/Los_Angeles".into()),
            }),
            json!({"date": {"start": "2026-08-05T09:00:00", "time_zone": "America/Los_Angeles"}})
        );
        assert_eq!(
            property_json(&PropertyValue::Relation(vec!["p1".into(), "p2".into()])),
            json!({"relation": [{"id": "p1"}, {"id": "p2"}]})
        );
    }

    #[test]
    fn parse_page_extracts_fields() {
        let page = parse_page(&page_json("page-1", "Buy gloves"));
        assert_eq!(page.id, "page-1");
        assert_eq!(page.title, "Buy gloves");
        assert_eq!(page.status.as_deref(), Some("Active"));
        assert_eq!(page.external_id.as_deref(), Some("t1"));
        assert!(!page.archived);
        assert!(page.created_at.is_some());
    }

    #[tokio::test]
    async fn create_page_appends_body_blocks() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/pages")
            .match_body(Matcher::PartialJsonString(
                json!({"parent": {"database_id": "db-tasks"}}).to_string(),
            ))
            .with_status(200)
            .with_body(page_json("page-1", "Buy gloves").to_string())
            .create_async()
            .await;
        let blocks = server
            .mock("PATCH", "/blocks/page-1/children")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let mut payload = PagePayload::default();
        payload.set("Name", PropertyValue::Title("Buy gloves".into()));
        payload.body.push(Block::Paragraph("desc".into()));

        let page = adapter(&server.url())
            .create_page(PageKind::Task, &payload)
            .await
            .unwrap();
        assert_eq!(page.id, "page-1");
        blocks.assert_async().await;
    }

    #[tokio::test]
    async fn find_by_external_id_queries_database() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/databases/db-tasks/query")
            .match_body(Matcher::PartialJsonString(
                json!({"filter": {"property": "Todoist Task ID", "rich_text": {"equals": "t1"}}})
                    .to_string(),
            ))
            .with_status(200)
            .with_body(json!({"results": [page_json("page-1", "Buy gloves")]}).to_string())
            .create_async()
            .await;

        let pages = adapter(&server.url())
            .find_by_external_id(PageKind::Task, "t1")
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].id, "page-1");
    }

    #[tokio::test]
    async fn list_people_follows_pagination() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/databases/db-people/query")
            .match_body(Matcher::PartialJsonString(
                json!({"page_size": 100}).to_string(),
            ))
            .with_status(200)
            .with_body(
                json!({
                    "results": [{
                        "id": "person-1",
                        "properties": {"Name": {"title": [{"text": {"content": "Doug Diego"}}]}}
                    }],
                    "has_more": true,
                    "next_cursor": "c2"
                })
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("POST", "/databases/db-people/query")
            .match_body(Matcher::PartialJsonString(
                json!({"start_cursor": "c2"}).to_string(),
            ))
            .with_status(200)
            .with_body(
                json!({
                    "results": [{
                        "id": "person-2",
                        "properties": {"Name": {"title": [{"text": {"content": "Varsha"}}]}}
                    }],
                    "has_more": false
                })
                .to_string(),
            )
            .create_async()
            .await;

        let people = adapter(&server.url()).list_people().await.unwrap();
        assert_eq!(people.len(), 2);
        assert_eq!(people[0].name, "Doug Diego");
        assert_eq!(people[1].name, "Varsha");
    }

    #[tokio::test]
    async fn query_relation_targets_reads_page_relations() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/pages/page-1")
            .with_status(200)
            .with_body(
                json!({
                    "id": "page-1",
                    "properties": {
                        "AREAS": {"relation": [{"id": "area-1"}, {"id": "area-2"}]}
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let ids = adapter(&server.url())
            .query_relation_targets("page-1", "AREAS")
            .await
            .unwrap();
        assert_eq!(ids, vec!["area-1", "area-2"]);
    }

    #[tokio::test]
    async fn missing_areas_database_yields_no_match() {
        let server = mockito::Server::new_async().await;
        let config = DestConfig {
            api_base_url: server.url(),
            api_token: "secret".into(),
            tasks_database_id: "db-tasks".into(),
            projects_database_id: "db-projects".into(),
            areas_database_id: None,
            people_database_id: None,
        };
        let sync_cfg = SyncConfig::default();
        let adapter =
            NotionAdapter::new(&config, &sync_cfg, Arc::new(RateLimiter::new())).unwrap();

        let found = adapter
            .find_relation_by_name(PageKind::Area, "WORK")
            .await
            .unwrap();
        assert!(found.is_none());
        assert!(adapter.list_people().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn validation_failure_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/pages/page-1")
            .with_status(400)
            .create_async()
            .await;

        let err = adapter(&server.url())
            .update_page("page-1", &PagePayload::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TmError::Permanent(_)));
    }
}
