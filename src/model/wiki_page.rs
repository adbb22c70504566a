use serde::{Deserialize, Serialize};

/// Entry of the wiki index: enough to rebuild the page tree without the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiPageRef {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiPage {
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Version comment of the latest edit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default)]
    pub attachment_count: usize,
}

impl WikiPage {
    /// Comments and uploads are not exported; callers warn when a page has either.
    pub fn has_unexported_content(&self) -> bool {
        self.comments.as_deref().is_some_and(|c| !c.trim().is_empty()) || self.attachment_count > 0
    }
}
