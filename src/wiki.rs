//! Redmine wiki to a directory of markdown files laid out for an Azure DevOps wiki repo.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::model::wiki_page::{WikiPage, WikiPageRef};
use crate::providers::WikiSource;

pub const AZURE_TOC_MARKER: &str = "[[_TOC_]]";

static WIKI_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]|]+)(?:\|([^\]]+))?\]\]").expect("valid wiki link regex"));

static TOC_MACRO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{[<>]?toc\}\}").expect("valid toc regex"));

/// Redmine's page-name normalization: spaces become underscores, slashes are dropped
/// and the first letter is upper-cased.
pub fn normalize_link_target(target: &str) -> String {
    let cleaned: String = target
        .chars()
        .filter(|c| *c != '/')
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();
    let mut chars = cleaned.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Root-first ancestor titles of `title`. The walk stops at a parent missing from
/// `parents` (deleted page) or on a cycle.
pub fn resolve_ancestors(title: &str, parents: &HashMap<String, Option<String>>) -> Vec<String> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([title.to_string()]);
    let mut current = parents.get(title).cloned().flatten();
    while let Some(parent) = current {
        let Some(grandparent) = parents.get(&parent) else {
            break;
        };
        if !seen.insert(parent.clone()) {
            break;
        }
        current = grandparent.clone();
        chain.push(parent);
    }
    chain.reverse();
    chain
}

/// File location relative to the export root: `A/B/C.md`.
pub fn page_file_path(ancestors: &[String], title: &str) -> PathBuf {
    let mut path: PathBuf = ancestors.iter().collect();
    path.push(format!("{title}.md"));
    path
}

/// Absolute wiki link to a page: `/A/B/C.md`.
fn page_link(ancestors: &[String], title: &str) -> String {
    let mut link = String::from("/");
    for ancestor in ancestors {
        link.push_str(ancestor);
        link.push('/');
    }
    link.push_str(title);
    link.push_str(".md");
    link
}

/// Rewrite `[[Target]]` / `[[Target|Label]]` into markdown links for every target
/// present in `index` (title -> ancestors). Unknown targets are left as they are.
pub fn rewrite_wiki_links(content: &str, index: &HashMap<String, Vec<String>>) -> String {
    WIKI_LINK
        .replace_all(content, |caps: &Captures<'_>| {
            let target = caps[1].trim();
            let label = caps.get(2).map_or(target, |m| m.as_str());
            let title = normalize_link_target(target);
            match index.get(&title) {
                Some(ancestors) => format!("[{label}]({})", page_link(ancestors, &title)),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

pub fn replace_toc(content: &str) -> String {
    TOC_MACRO.replace_all(content, AZURE_TOC_MARKER).into_owned()
}

/// Text of a page as written to disk.
pub fn convert_page(text: &str, index: &HashMap<String, Vec<String>>) -> String {
    replace_toc(&rewrite_wiki_links(text, index))
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub written: Vec<PathBuf>,
    pub with_ignored_content: Vec<String>,
    pub missing: Vec<String>,
}

pub struct WikiExporter<'a> {
    source: &'a dyn WikiSource,
    project: String,
    output_dir: PathBuf,
}

impl<'a> WikiExporter<'a> {
    pub fn new(source: &'a dyn WikiSource, project: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            project: project.into(),
            output_dir: output_dir.into(),
        }
    }

    async fn fetch_pages(&self, refs: &[WikiPageRef], report: &mut ExportReport) -> Result<Vec<WikiPage>> {
        let mut pages = Vec::with_capacity(refs.len());
        for page_ref in refs {
            tracing::info!(title = %page_ref.title, "fetching wiki page");
            let Some(page) = self
                .source
                .get_wiki_page(&self.project, &page_ref.title)
                .await
                .with_context(|| format!("Failed to fetch wiki page {}", page_ref.title))?
            else {
                tracing::warn!(title = %page_ref.title, "listed in the index but not found, skipping");
                report.missing.push(page_ref.title.clone());
                continue;
            };
            if page.has_unexported_content() {
                tracing::warn!(title = %page.title, "page has comments and/or attachments which are not exported");
                report.with_ignored_content.push(page.title.clone());
            }
            pages.push(page);
        }
        Ok(pages)
    }

    pub async fn export(&self) -> Result<ExportReport> {
        let refs = self.source.list_wiki_pages(&self.project).await?;
        let parents: HashMap<String, Option<String>> = refs
            .iter()
            .map(|r| (r.title.clone(), r.parent.clone()))
            .collect();

        let mut report = ExportReport::default();
        let pages = self.fetch_pages(&refs, &mut report).await?;

        let index: HashMap<String, Vec<String>> = pages
            .iter()
            .map(|p| (p.title.clone(), resolve_ancestors(&p.title, &parents)))
            .collect();

        for page in &pages {
            let ancestors = &index[&page.title];
            let path = self.output_dir.join(page_file_path(ancestors, &page.title));
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
            std::fs::write(&path, convert_page(&page.text, &index))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::debug!(path = %path.display(), "page written");
            report.written.push(path);
        }
        Ok(report)
    }
}
