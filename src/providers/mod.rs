pub mod azure;
pub mod redmine;

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::IssueFilter;
use crate::model::issue::{Attachment, Issue};
use crate::model::wiki_page::{WikiPage, WikiPageRef};
use crate::model::work_item::{CommentPage, PatchOperation, WorkItem, WorkItemComment};

/// Read side of the source tracker.
#[async_trait]
pub trait IssueSource: Send + Sync {
    fn name(&self) -> &str;
    /// Base url used for "link to original issue".
    fn issue_url(&self, issue_id: u64) -> String;
    /// All issues matching `filter`, fully loaded, in the order the tracker returns them.
    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>>;
    /// Download an attachment's bytes into `dest`.
    async fn download_attachment(&self, attachment: &Attachment, dest: &Path) -> Result<()>;
}

#[async_trait]
pub trait WikiSource: Send + Sync {
    async fn list_wiki_pages(&self, project: &str) -> Result<Vec<WikiPageRef>>;
    async fn get_wiki_page(&self, project: &str, title: &str) -> Result<Option<WikiPage>>;
}

/// Write side of the destination tracker.
#[async_trait]
pub trait WorkItemSink: Send + Sync {
    fn name(&self) -> &str;
    async fn create_work_item(
        &self,
        operations: &[PatchOperation],
        bypass_rules: bool,
        suppress_notifications: bool,
    ) -> Result<WorkItem>;
    async fn update_work_item(&self, id: u64, operations: &[PatchOperation]) -> Result<WorkItem>;
    async fn get_work_item(&self, id: u64) -> Result<WorkItem>;
    async fn add_comment(&self, work_item_id: u64, text: &str) -> Result<WorkItemComment>;
    async fn update_comment(&self, work_item_id: u64, comment_id: u64, text: &str) -> Result<()>;
    async fn get_comments(
        &self,
        work_item_id: u64,
        continuation_token: Option<&str>,
    ) -> Result<CommentPage>;
    /// Upload a file; returns the attachment url to link from a work item.
    async fn create_attachment(&self, file_name: &str, content: Vec<u8>) -> Result<String>;

    /// Every comment on a work item, following continuation tokens until exhausted.
    /// A token handed out twice ends the walk.
    async fn all_comments(&self, work_item_id: u64) -> Result<Vec<WorkItemComment>> {
        let mut page = self.get_comments(work_item_id, None).await?;
        let mut comments = std::mem::take(&mut page.comments);
        let mut seen_tokens = HashSet::new();
        while let Some(token) = page.continuation_token.take() {
            if !seen_tokens.insert(token.clone()) {
                tracing::warn!(work_item = work_item_id, %token, "continuation token repeated, stopping");
                break;
            }
            page = self.get_comments(work_item_id, Some(&token)).await?;
            comments.append(&mut page.comments);
        }
        Ok(comments)
    }
}
