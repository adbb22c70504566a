use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{IssueSource, WikiSource};
use crate::config::{IssueFilter, RedmineSettings};
use crate::error::check_status;
use crate::model::issue::{Attachment, Issue, Journal};
use crate::model::wiki_page::{WikiPage, WikiPageRef};

const PAGE_SIZE: u64 = 100;
const SERVICE: &str = "Redmine";

pub struct RedmineClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl RedmineClient {
    pub fn new(settings: &RedmineSettings) -> Self {
        Self {
            base_url: settings.url.clone(),
            api_key: settings.api_key.clone(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        tracing::debug!(%url, "GET");
        let resp = self
            .client
            .get(url)
            .header("X-Redmine-API-Key", &self.api_key)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await
            .with_context(|| format!("Redmine request to {url} failed"))?;
        let resp = check_status(SERVICE, resp).await?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse Redmine response from {url}"))
    }

    async fn list_issue_ids(&self, filter: &IssueFilter) -> Result<Vec<u64>> {
        let url = format!("{}/issues.json", self.base_url);
        let mut ids = Vec::new();
        let mut offset = 0u64;
        loop {
            let mut query = vec![
                ("status_id", filter.status_id.clone()),
                ("sort", filter.sort.clone()),
                ("offset", offset.to_string()),
                ("limit", PAGE_SIZE.to_string()),
            ];
            if let Some(project) = &filter.project_id {
                query.push(("project_id", project.clone()));
            }
            if let Some(created_on) = &filter.created_on {
                query.push(("created_on", created_on.clone()));
            }
            let page: IssuesPage = self.get_json(&url, &query).await?;
            let fetched = page.issues.len() as u64;
            ids.extend(page.issues.into_iter().map(|i| i.id));
            offset += fetched;
            if fetched == 0 || offset >= page.total_count {
                break;
            }
        }
        Ok(ids)
    }

    pub async fn get_issue(&self, id: u64) -> Result<Issue> {
        let url = format!("{}/issues/{id}.json", self.base_url);
        let envelope: IssueEnvelope = self
            .get_json(&url, &[("include", "journals,attachments".to_string())])
            .await
            .with_context(|| format!("Failed to load Redmine issue {id}"))?;
        Ok(envelope.issue.into())
    }

    fn wiki_url(&self, project: &str, page: &str) -> String {
        format!(
            "{}/projects/{}/wiki/{}.json",
            self.base_url,
            urlencoding::encode(project),
            urlencoding::encode(page)
        )
    }
}

#[derive(Deserialize)]
struct IssuesPage {
    issues: Vec<IssueStub>,
    #[serde(default)]
    total_count: u64,
}

#[derive(Deserialize)]
struct IssueStub {
    id: u64,
}

#[derive(Deserialize)]
struct IssueEnvelope {
    issue: RmIssue,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
struct IdRef {
    id: u64,
}

#[derive(Deserialize)]
struct RmIssue {
    id: u64,
    subject: String,
    description: Option<String>,
    tracker: Named,
    priority: Named,
    status: Named,
    author: Named,
    assigned_to: Option<Named>,
    parent: Option<IdRef>,
    created_on: DateTime<Utc>,
    #[serde(default)]
    journals: Vec<RmJournal>,
    #[serde(default)]
    attachments: Vec<RmAttachment>,
}

#[derive(Deserialize)]
struct RmJournal {
    user: Option<Named>,
    notes: Option<String>,
    created_on: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RmAttachment {
    id: u64,
    filename: String,
    #[serde(default)]
    filesize: u64,
    content_url: String,
    description: Option<String>,
}

impl From<RmIssue> for Issue {
    fn from(issue: RmIssue) -> Self {
        Issue {
            id: issue.id,
            subject: issue.subject,
            description: issue.description.unwrap_or_default(),
            tracker: issue.tracker.name,
            priority: issue.priority.name,
            status: issue.status.name,
            author: issue.author.name,
            assigned_to: issue.assigned_to.map(|a| a.name),
            created_on: issue.created_on,
            parent_id: issue.parent.map(|p| p.id),
            journals: issue
                .journals
                .into_iter()
                .map(|j| Journal {
                    author: j.user.map(|u| u.name).unwrap_or_else(|| "Anonymous".into()),
                    notes: j.notes,
                    created_on: j.created_on,
                })
                .collect(),
            attachments: issue
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    id: a.id,
                    filename: a.filename,
                    content_url: a.content_url,
                    description: a.description.filter(|d| !d.is_empty()),
                    filesize: a.filesize,
                })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct WikiIndex {
    wiki_pages: Vec<RmWikiRef>,
}

#[derive(Deserialize)]
struct TitleRef {
    title: String,
}

#[derive(Deserialize)]
struct RmWikiRef {
    title: String,
    parent: Option<TitleRef>,
}

#[derive(Deserialize)]
struct WikiEnvelope {
    wiki_page: RmWikiPage,
}

#[derive(Deserialize)]
struct RmWikiPage {
    title: String,
    text: Option<String>,
    parent: Option<TitleRef>,
    comments: Option<String>,
    #[serde(default)]
    attachments: Vec<serde_json::Value>,
}

#[async_trait]
impl IssueSource for RedmineClient {
    fn name(&self) -> &str {
        SERVICE
    }

    fn issue_url(&self, issue_id: u64) -> String {
        format!("{}/issues/{issue_id}", self.base_url)
    }

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let ids = match &filter.ids {
            Some(ids) => ids.clone(),
            None => self.list_issue_ids(filter).await?,
        };
        tracing::info!(count = ids.len(), "loading Redmine issues");
        let mut issues = Vec::with_capacity(ids.len());
        for id in ids {
            issues.push(self.get_issue(id).await?);
        }
        Ok(issues)
    }

    async fn download_attachment(&self, attachment: &Attachment, dest: &Path) -> Result<()> {
        tracing::debug!(url = %attachment.content_url, "downloading attachment");
        let resp = self
            .client
            .get(&attachment.content_url)
            .header("X-Redmine-API-Key", &self.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", attachment.filename))?;
        let resp = check_status(SERVICE, resp).await?;
        let bytes = resp.bytes().await?;
        tokio::fs::write(dest, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        Ok(())
    }
}

#[async_trait]
impl WikiSource for RedmineClient {
    async fn list_wiki_pages(&self, project: &str) -> Result<Vec<WikiPageRef>> {
        let index: WikiIndex = self.get_json(&self.wiki_url(project, "index"), &[]).await?;
        Ok(index
            .wiki_pages
            .into_iter()
            .map(|p| WikiPageRef {
                title: p.title,
                parent: p.parent.map(|t| t.title),
            })
            .collect())
    }

    async fn get_wiki_page(&self, project: &str, title: &str) -> Result<Option<WikiPage>> {
        let url = self.wiki_url(project, title);
        tracing::debug!(%url, "GET");
        let resp = self
            .client
            .get(&url)
            .header("X-Redmine-API-Key", &self.api_key)
            .query(&[("include", "attachments")])
            .send()
            .await
            .with_context(|| format!("Redmine request to {url} failed"))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: WikiEnvelope = check_status(SERVICE, resp)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse wiki page {title}"))?;
        let page = envelope.wiki_page;
        Ok(Some(WikiPage {
            title: page.title,
            text: page.text.unwrap_or_default(),
            parent: page.parent.map(|p| p.title),
            comments: page.comments,
            attachment_count: page.attachments.len(),
        }))
    }
}
