use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::WorkItemSink;
use crate::config::AzureSettings;
use crate::error::check_status;
use crate::model::work_item::{
    CommentPage, PatchOperation, Relation, WorkItem, WorkItemComment, FIELD_ASSIGNED_TO,
    FIELD_DESCRIPTION, FIELD_STATE, FIELD_TAGS, FIELD_TITLE,
};

const SERVICE: &str = "Azure DevOps";
const API_VERSION: &str = "7.1";
const COMMENTS_API_VERSION: &str = "7.1-preview.4";
const JSON_PATCH: &str = "application/json-patch+json";

pub struct AzureDevOpsClient {
    wit_url: String,
    work_item_type: String,
    auth_header: String,
    client: reqwest::Client,
}

impl AzureDevOpsClient {
    pub fn new(settings: &AzureSettings) -> Self {
        // Personal access tokens go in the password slot with an empty user.
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!(":{}", settings.token));
        Self {
            wit_url: format!(
                "{}/{}/{}/_apis/wit",
                settings.base_url,
                urlencoding::encode(&settings.organization),
                urlencoding::encode(&settings.project)
            ),
            work_item_type: settings.work_item_type.clone(),
            auth_header: format!("Basic {encoded}"),
            client: reqwest::Client::new(),
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let resp = request
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Azure DevOps request failed")?;
        let resp = check_status(SERVICE, resp).await?;
        resp.json().await.context("Failed to parse Azure DevOps response")
    }

    async fn patch_work_item(
        &self,
        request: reqwest::RequestBuilder,
        ops: &[PatchOperation],
    ) -> Result<WorkItem> {
        let body = serde_json::to_vec(ops)?;
        let raw: RawWorkItem = self
            .send(request.header("Content-Type", JSON_PATCH).body(body))
            .await?;
        Ok(raw.into())
    }
}

#[derive(Deserialize)]
struct RawWorkItem {
    id: u64,
    url: String,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    relations: Option<Vec<Relation>>,
}

fn field_str(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields.get(name).and_then(|v| v.as_str()).map(String::from)
}

/// AssignedTo comes back as an identity object; creation accepts a plain name.
fn identity_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("displayName")
            .or_else(|| obj.get("uniqueName"))
            .and_then(|v| v.as_str())
            .map(String::from),
        _ => None,
    }
}

impl From<RawWorkItem> for WorkItem {
    fn from(raw: RawWorkItem) -> Self {
        let tags = field_str(&raw.fields, FIELD_TAGS)
            .map(|t| {
                t.split(';')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        WorkItem {
            id: raw.id,
            url: raw.url,
            title: field_str(&raw.fields, FIELD_TITLE),
            description: field_str(&raw.fields, FIELD_DESCRIPTION),
            state: field_str(&raw.fields, FIELD_STATE),
            assigned_to: raw.fields.get(FIELD_ASSIGNED_TO).and_then(identity_name),
            tags,
            relations: raw.relations.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommentList {
    #[serde(default)]
    comments: Vec<WorkItemComment>,
    continuation_token: Option<String>,
}

#[derive(Deserialize)]
struct RawAttachmentRef {
    url: String,
}

#[async_trait]
impl WorkItemSink for AzureDevOpsClient {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn create_work_item(
        &self,
        operations: &[PatchOperation],
        bypass_rules: bool,
        suppress_notifications: bool,
    ) -> Result<WorkItem> {
        let url = format!(
            "{}/workitems/${}",
            self.wit_url,
            urlencoding::encode(&self.work_item_type)
        );
        tracing::debug!(%url, ops = operations.len(), "POST");
        let request = self.client.post(&url).query(&[
            ("api-version", API_VERSION.to_string()),
            ("bypassRules", bypass_rules.to_string()),
            ("suppressNotifications", suppress_notifications.to_string()),
        ]);
        self.patch_work_item(request, operations)
            .await
            .context("Failed to create work item")
    }

    async fn update_work_item(&self, id: u64, operations: &[PatchOperation]) -> Result<WorkItem> {
        let url = format!("{}/workitems/{id}", self.wit_url);
        tracing::debug!(%url, ops = operations.len(), "PATCH");
        let request = self.client.patch(&url).query(&[("api-version", API_VERSION)]);
        self.patch_work_item(request, operations)
            .await
            .with_context(|| format!("Failed to update work item {id}"))
    }

    async fn get_work_item(&self, id: u64) -> Result<WorkItem> {
        let url = format!("{}/workitems/{id}", self.wit_url);
        tracing::debug!(%url, "GET");
        let request = self
            .client
            .get(&url)
            .query(&[("$expand", "relations"), ("api-version", API_VERSION)]);
        let raw: RawWorkItem = self
            .send(request)
            .await
            .with_context(|| format!("Failed to load work item {id}"))?;
        Ok(raw.into())
    }

    async fn add_comment(&self, work_item_id: u64, text: &str) -> Result<WorkItemComment> {
        let url = format!("{}/workItems/{work_item_id}/comments", self.wit_url);
        tracing::debug!(%url, "POST");
        let request = self
            .client
            .post(&url)
            .query(&[("api-version", COMMENTS_API_VERSION)])
            .json(&json!({ "text": text }));
        self.send(request)
            .await
            .with_context(|| format!("Failed to add comment to work item {work_item_id}"))
    }

    async fn update_comment(&self, work_item_id: u64, comment_id: u64, text: &str) -> Result<()> {
        let url = format!(
            "{}/workItems/{work_item_id}/comments/{comment_id}",
            self.wit_url
        );
        tracing::debug!(%url, "PATCH");
        let request = self
            .client
            .patch(&url)
            .query(&[("api-version", COMMENTS_API_VERSION)])
            .json(&json!({ "text": text }));
        let _: Value = self
            .send(request)
            .await
            .with_context(|| format!("Failed to update comment {comment_id} on {work_item_id}"))?;
        Ok(())
    }

    async fn get_comments(
        &self,
        work_item_id: u64,
        continuation_token: Option<&str>,
    ) -> Result<CommentPage> {
        let url = format!("{}/workItems/{work_item_id}/comments", self.wit_url);
        tracing::debug!(%url, continuation = continuation_token.is_some(), "GET");
        let mut request = self
            .client
            .get(&url)
            .query(&[("api-version", COMMENTS_API_VERSION)]);
        if let Some(token) = continuation_token {
            request = request.query(&[("continuationToken", token)]);
        }
        let raw: RawCommentList = self
            .send(request)
            .await
            .with_context(|| format!("Failed to list comments of work item {work_item_id}"))?;
        Ok(CommentPage {
            comments: raw.comments,
            continuation_token: raw.continuation_token.filter(|t| !t.is_empty()),
        })
    }

    async fn create_attachment(&self, file_name: &str, content: Vec<u8>) -> Result<String> {
        let url = format!("{}/attachments", self.wit_url);
        tracing::debug!(%url, file_name, bytes = content.len(), "POST");
        let request = self
            .client
            .post(&url)
            .query(&[("fileName", file_name), ("api-version", API_VERSION)])
            .header("Content-Type", "application/octet-stream")
            .body(content);
        let reference: RawAttachmentRef = self
            .send(request)
            .await
            .with_context(|| format!("Failed to upload attachment {file_name}"))?;
        Ok(reference.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::work_item::{RelationKind, FIELD_TITLE};
    use wiremock::matchers::{body_json, header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const WIT: &str = "/acme/Widgets/_apis/wit";

    fn client(server: &MockServer) -> AzureDevOpsClient {
        AzureDevOpsClient::new(&AzureSettings {
            base_url: server.uri(),
            organization: "acme".into(),
            project: "Widgets".into(),
            token: "pat".into(),
            work_item_type: "Issue".into(),
            initial_state: "To Do".into(),
            tag: "redmine".into(),
        })
    }

    #[tokio::test]
    async fn create_sends_json_patch_with_flags() {
        let server = MockServer::start().await;
        let ops = vec![PatchOperation::add_field(FIELD_TITLE, "Hello")];

        Mock::given(method("POST"))
            .and(path(format!("{WIT}/workitems/$Issue")))
            .and(query_param("bypassRules", "true"))
            .and(query_param("suppressNotifications", "true"))
            .and(header("Content-Type", JSON_PATCH))
            // base64(":pat")
            .and(header("Authorization", "Basic OnBhdA=="))
            .and(body_json(json!([
                {"op": "add", "path": "/fields/System.Title", "value": "Hello"}
            ])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 501,
                "rev": 1,
                "url": "https://dev.azure.com/acme/_apis/wit/workItems/501",
                "fields": {
                    "System.Title": "Hello",
                    "System.State": "To Do",
                    "System.Tags": "redmine; imported",
                    "System.AssignedTo": {"displayName": "John F. Doe", "uniqueName": "john@acme"}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let item = client(&server).create_work_item(&ops, true, true).await.unwrap();
        assert_eq!(item.id, 501);
        assert_eq!(item.title.as_deref(), Some("Hello"));
        assert_eq!(item.tags, vec!["redmine", "imported"]);
        assert_eq!(item.assigned_to.as_deref(), Some("John F. Doe"));
    }

    #[tokio::test]
    async fn get_work_item_expands_relations() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{WIT}/workitems/7")))
            .and(query_param("$expand", "relations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 7,
                "url": "u7",
                "fields": {"System.Description": "<p>#3</p>"},
                "relations": [{"rel": "System.LinkTypes.Related", "url": "u8", "attributes": {"isLocked": false}}]
            })))
            .mount(&server)
            .await;

        let item = client(&server).get_work_item(7).await.unwrap();
        assert_eq!(item.description.as_deref(), Some("<p>#3</p>"));
        assert!(item.has_relation(RelationKind::Related, "u8"));
    }

    #[tokio::test]
    async fn all_comments_follows_continuation_tokens() {
        let server = MockServer::start().await;
        let comments_path = format!("{WIT}/workItems/9/comments");

        Mock::given(method("GET"))
            .and(path(comments_path.clone()))
            .and(query_param_is_missing("continuationToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalCount": 3, "count": 2,
                "comments": [{"id": 1, "text": "a"}, {"id": 2, "text": "b"}],
                "continuationToken": "page-2"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(comments_path))
            .and(query_param("continuationToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalCount": 3, "count": 1,
                "comments": [{"id": 3, "text": "c"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let comments = client(&server).all_comments(9).await.unwrap();
        let ids: Vec<u64> = comments.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn attachment_upload_returns_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{WIT}/attachments")))
            .and(query_param("fileName", "log file.txt"))
            .and(header("Content-Type", "application/octet-stream"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "abc",
                "url": "https://dev.azure.com/acme/_apis/wit/attachments/abc"
            })))
            .mount(&server)
            .await;

        let url = client(&server)
            .create_attachment("log file.txt", b"hey".to_vec())
            .await
            .unwrap();
        assert_eq!(url, "https://dev.azure.com/acme/_apis/wit/attachments/abc");
    }

    #[tokio::test]
    async fn failed_update_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(format!("{WIT}/workitems/4")))
            .respond_with(ResponseTemplate::new(400).set_body_string("TF401320: rule error"))
            .mount(&server)
            .await;

        let ops = vec![PatchOperation::add_field(FIELD_STATE, "Done")];
        let err = client(&server).update_work_item(4, &ops).await.unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("Failed to update work item 4"));
        assert!(text.contains("TF401320"));
    }

    #[tokio::test]
    async fn comment_update_sends_text() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(format!("{WIT}/workItems/9/comments/2")))
            .and(body_json(json!({"text": "see #501"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 2, "text": "see #501"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).update_comment(9, 2, "see #501").await.unwrap();
    }
}
