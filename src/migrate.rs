//! Redmine issues to Azure DevOps work items.
//!
//! A run has three phases. Phase 1 creates one work item per issue (with comments,
//! attachments and the final state) and records it in the [`IdMap`]. Phase 2 adds
//! parent links once every item exists. Phase 3 rewrites `#<id>` references in
//! descriptions and comments and relates the referenced items.
//!
//! Phases 2 and 3 cover every listed issue that has a map entry, including items
//! created by an earlier, interrupted run. Both are safe to repeat.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::SecondsFormat;

use crate::config::{AzureSettings, IssueFilter, MappingConfig};
use crate::idmap::{IdMap, MappedItem};
use crate::markdown::render_redmine;
use crate::model::issue::{Attachment, Issue, Journal};
use crate::model::work_item::{
    PatchOperation, Relation, RelationKind, WorkItem, FIELD_ASSIGNED_TO, FIELD_CREATED_DATE,
    FIELD_DESCRIPTION, FIELD_STATE, FIELD_TAGS, FIELD_TITLE,
};
use crate::providers::{IssueSource, WorkItemSink};
use crate::refs::rewrite_references;

/// The knobs that shape each created work item.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    pub tag: String,
    pub initial_state: String,
    pub mapping: MappingConfig,
}

impl MigrationSettings {
    pub fn new(azure: &AzureSettings, mapping: &MappingConfig) -> Self {
        Self {
            tag: azure.tag.clone(),
            initial_state: azure.initial_state.clone(),
            mapping: mapping.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MigrationReport {
    pub created: Vec<u64>,
    pub skipped: Vec<u64>,
    pub parent_links: usize,
    pub items_fixed: usize,
    pub id_map_path: PathBuf,
}

pub struct IssueMigrator<'a> {
    source: &'a dyn IssueSource,
    sink: &'a dyn WorkItemSink,
    settings: MigrationSettings,
}

impl<'a> IssueMigrator<'a> {
    pub fn new(
        source: &'a dyn IssueSource,
        sink: &'a dyn WorkItemSink,
        settings: MigrationSettings,
    ) -> Self {
        Self {
            source,
            sink,
            settings,
        }
    }

    /// Mapped Azure user for a Redmine assignee, else the default assignee, else nobody.
    pub fn resolve_assignee(&self, assigned_to: Option<&str>) -> Option<String> {
        let mapping = &self.settings.mapping;
        assigned_to
            .and_then(|name| mapping.authors.get(name))
            .or(mapping.default_assignee.as_ref())
            .cloned()
    }

    /// State to move to after creation, if the mapped state differs from the initial one.
    pub fn target_state(&self, status: &str) -> Option<&str> {
        self.settings
            .mapping
            .status
            .get(status)
            .map(String::as_str)
            .filter(|state| *state != self.settings.initial_state)
    }

    pub fn description_html(&self, issue: &Issue) -> String {
        let footer = format!(
            "\n\n| Name | Value |\n\
             | ---- | -----: |\n\
             | Issue | [{id}]({url}) |\n\
             | Tracker | {tracker} |\n\
             | Priority | {priority} |\n\
             | Author | {author} |\n\
             | Assigned | {assigned} |\n",
            id = issue.id,
            url = self.source.issue_url(issue.id),
            tracker = issue.tracker,
            priority = issue.priority,
            author = issue.author,
            assigned = issue.assigned_to.as_deref().unwrap_or("Unassigned"),
        );
        render_redmine(&format!("{}{footer}", issue.description))
    }

    pub fn creation_ops(&self, issue: &Issue) -> Vec<PatchOperation> {
        let original = Relation::new(RelationKind::Hyperlink, self.source.issue_url(issue.id))
            .with_comment(Some("link to original issue".into()));
        let mut ops = vec![
            PatchOperation::add_field(FIELD_TAGS, self.settings.tag.as_str()),
            PatchOperation::add_relation(original),
            PatchOperation::add_field(
                FIELD_CREATED_DATE,
                issue.created_on.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            PatchOperation::add_field(FIELD_TITLE, issue.subject.as_str()),
            PatchOperation::add_field(FIELD_DESCRIPTION, self.description_html(issue)),
            // Some workflows reject creating an item directly in its final state.
            PatchOperation::add_field(FIELD_STATE, self.settings.initial_state.as_str()),
        ];
        if let Some(assignee) = self.resolve_assignee(issue.assigned_to.as_deref()) {
            ops.push(PatchOperation::add_field(FIELD_ASSIGNED_TO, assignee));
        }
        ops
    }

    /// Phase 1 for one issue. The IdMap entry is recorded as soon as the item exists.
    pub async fn migrate_issue(&self, issue: &Issue, map: &mut IdMap) -> Result<WorkItem> {
        tracing::info!(issue = issue.id, "start migration");
        // Backdating the creation date needs bypassRules.
        let item = self
            .sink
            .create_work_item(&self.creation_ops(issue), true, true)
            .await?;
        map.insert(issue.id, item.id, item.url.clone());

        for journal in &issue.journals {
            if let Some(text) = comment_markdown(journal) {
                self.sink.add_comment(item.id, &render_redmine(&text)).await?;
            }
        }

        self.migrate_attachments(issue, item.id).await?;

        if let Some(state) = self.target_state(&issue.status) {
            self.sink
                .update_work_item(item.id, &[PatchOperation::add_field(FIELD_STATE, state)])
                .await?;
        }

        tracing::info!(issue = issue.id, work_item = item.id, subject = %issue.subject, "migrated");
        Ok(item)
    }

    /// Download into a directory scoped to the issue, upload, link. The directory is
    /// removed when this returns, whether or not every attachment made it.
    async fn migrate_attachments(&self, issue: &Issue, work_item_id: u64) -> Result<()> {
        if issue.attachments.is_empty() {
            return Ok(());
        }
        let dir = tempfile::Builder::new()
            .prefix("redmine-")
            .suffix(&format!("-{}", issue.id))
            .tempdir()
            .context("Failed to create attachment directory")?;

        for attachment in &issue.attachments {
            let local = dir.path().join(local_file_name(attachment));
            self.source.download_attachment(attachment, &local).await?;
            let content = tokio::fs::read(&local)
                .await
                .with_context(|| format!("Failed to read {}", local.display()))?;
            let url = self
                .sink
                .create_attachment(&attachment.filename, content)
                .await?;
            let link = Relation::new(RelationKind::AttachedFile, url)
                .with_comment(attachment.description.clone());
            self.sink
                .update_work_item(work_item_id, &[PatchOperation::add_relation(link)])
                .await?;
            tracing::debug!(issue = issue.id, file = %attachment.filename, "attachment migrated");
        }
        Ok(())
    }

    /// Phase 2: child -> parent links for the given migrated issues. Links already
    /// present on the child are not added again.
    pub async fn link_parents(&self, issues: &[Issue], migrated: &[u64], map: &IdMap) -> Result<usize> {
        let mut linked = 0;
        for issue in issues.iter().filter(|i| migrated.contains(&i.id)) {
            let Some(parent_id) = issue.parent_id else {
                continue;
            };
            let (Some(child), Some(parent)) = (map.get(issue.id), map.get(parent_id)) else {
                continue;
            };
            let child_item = self.sink.get_work_item(child.id).await?;
            if child_item.has_relation(RelationKind::HierarchyReverse, &parent.url) {
                tracing::debug!(parent = parent_id, child = issue.id, "parent link already present");
                continue;
            }
            tracing::info!(parent = parent_id, child = issue.id, "adding parent link");
            let link = Relation::new(RelationKind::HierarchyReverse, parent.url.clone());
            self.sink
                .update_work_item(child.id, &[PatchOperation::add_relation(link)])
                .await?;
            linked += 1;
        }
        Ok(linked)
    }

    /// Phase 3 for one work item. Returns whether anything was changed.
    pub async fn fix_item_references(&self, mapped: &MappedItem, map: &IdMap) -> Result<bool> {
        let item = self.sink.get_work_item(mapped.id).await?;
        let mut related = RelatedLinks::new(&item);
        let mut changed = false;

        for comment in self.sink.all_comments(item.id).await? {
            let rewrite = rewrite_references(&comment.text, map);
            related.extend(&rewrite.hits, map);
            if rewrite.changed(&comment.text) {
                tracing::info!(work_item = item.id, comment = comment.id, hits = ?rewrite.hits, "rewriting comment references");
                self.sink
                    .update_comment(item.id, comment.id, &rewrite.text)
                    .await?;
                changed = true;
            }
        }

        let description = item.description.clone().unwrap_or_default();
        let rewrite = rewrite_references(&description, map);
        related.extend(&rewrite.hits, map);

        let mut ops: Vec<PatchOperation> = related
            .urls
            .into_iter()
            .map(|url| PatchOperation::add_relation(Relation::new(RelationKind::Related, url)))
            .collect();
        if rewrite.changed(&description) {
            tracing::info!(work_item = item.id, hits = ?rewrite.hits, "rewriting description references");
            ops.push(PatchOperation::replace_field(FIELD_DESCRIPTION, rewrite.text));
        }
        if !ops.is_empty() {
            self.sink.update_work_item(item.id, &ops).await?;
            changed = true;
        }
        Ok(changed)
    }

    /// Phase 3 across the given migrated issues.
    pub async fn fix_references(&self, migrated: &[u64], map: &IdMap) -> Result<usize> {
        let mut fixed = 0;
        for source_id in migrated {
            let Some(mapped) = map.get(*source_id) else {
                continue;
            };
            if self
                .fix_item_references(mapped, map)
                .await
                .with_context(|| format!("Failed to fix references of work item {}", mapped.id))?
            {
                fixed += 1;
            }
        }
        Ok(fixed)
    }

    /// Full run. `map` may come from an earlier run; issues already in it are not
    /// created again but still go through phases 2 and 3. The map is written to
    /// `id_map_path` after phase 1, including when phase 1 stops on an error.
    pub async fn run(
        &self,
        filter: &IssueFilter,
        mut map: IdMap,
        id_map_path: &Path,
    ) -> Result<(MigrationReport, IdMap)> {
        let issues = self.source.list_issues(filter).await?;
        tracing::info!(
            count = issues.len(),
            source = self.source.name(),
            destination = self.sink.name(),
            "issues to migrate"
        );

        let mut report = MigrationReport {
            id_map_path: id_map_path.to_path_buf(),
            ..Default::default()
        };

        for issue in &issues {
            if let Some(existing) = map.get(issue.id) {
                tracing::info!(issue = issue.id, work_item = existing.id, "already migrated, skipping");
                report.skipped.push(issue.id);
                continue;
            }
            if let Err(err) = self.migrate_issue(issue, &mut map).await {
                match map.save_to(id_map_path) {
                    Ok(()) => tracing::warn!(path = %id_map_path.display(), entries = map.len(), "partial id map saved"),
                    Err(save_err) => tracing::error!(error = %save_err, "could not save partial id map"),
                }
                return Err(err.context(format!("Migration of Redmine issue {} failed", issue.id)));
            }
            report.created.push(issue.id);
        }

        map.save_to(id_map_path)?;
        tracing::info!(path = %id_map_path.display(), entries = map.len(), "id map saved");

        // Items from a resumed map may have been created before phases 2 and 3 ever ran.
        let migrated: Vec<u64> = issues
            .iter()
            .map(|i| i.id)
            .filter(|id| map.contains(*id))
            .collect();
        report.parent_links = self.link_parents(&issues, &migrated, &map).await?;
        report.items_fixed = self.fix_references(&migrated, &map).await?;
        Ok((report, map))
    }
}

/// Related links collected for one work item: deduplicated, no self links, none that
/// already exist on the item.
struct RelatedLinks<'i> {
    item: &'i WorkItem,
    seen: BTreeSet<u64>,
    urls: Vec<String>,
}

impl<'i> RelatedLinks<'i> {
    fn new(item: &'i WorkItem) -> Self {
        Self {
            item,
            seen: BTreeSet::new(),
            urls: Vec::new(),
        }
    }

    fn extend(&mut self, hits: &[u64], map: &IdMap) {
        for target in hits.iter().filter_map(|id| map.get(*id)) {
            if target.id == self.item.id
                || self.item.has_relation(RelationKind::Related, &target.url)
                || !self.seen.insert(target.id)
            {
                continue;
            }
            self.urls.push(target.url.clone());
        }
    }
}

/// Journal notes plus the original author and date, or `None` for change-only entries.
fn comment_markdown(journal: &Journal) -> Option<String> {
    let notes = journal.comment_text()?;
    Some(format!(
        "{notes}\n\n\n*Original author: {}*\n\n*Original date: {}*",
        journal.author,
        journal.created_on.format("%Y-%m-%d %H:%M:%S")
    ))
}

/// Attachment names are user supplied; keep only the last path component.
fn local_file_name(attachment: &Attachment) -> String {
    let name = attachment
        .filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." {
        format!("attachment-{}", attachment.id)
    } else {
        name.to_string()
    }
}
