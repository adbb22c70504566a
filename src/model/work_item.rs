use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const FIELD_TITLE: &str = "System.Title";
pub const FIELD_DESCRIPTION: &str = "System.Description";
pub const FIELD_STATE: &str = "System.State";
pub const FIELD_TAGS: &str = "System.Tags";
pub const FIELD_ASSIGNED_TO: &str = "System.AssignedTo";
pub const FIELD_CREATED_DATE: &str = "System.CreatedDate";

/// An Azure DevOps work item as read back from the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: u64,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl WorkItem {
    pub fn has_relation(&self, kind: RelationKind, url: &str) -> bool {
        self.relations
            .iter()
            .any(|r| r.rel == kind.as_str() && r.url == url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Hyperlink,
    AttachedFile,
    HierarchyReverse,
    Related,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Hyperlink => "Hyperlink",
            RelationKind::AttachedFile => "AttachedFile",
            RelationKind::HierarchyReverse => "System.LinkTypes.Hierarchy-Reverse",
            RelationKind::Related => "System.LinkTypes.Related",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub rel: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<RelationAttributes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Relation {
    pub fn new(kind: RelationKind, url: impl Into<String>) -> Self {
        Self {
            rel: kind.as_str().to_string(),
            url: url.into(),
            attributes: None,
        }
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.attributes = comment.map(|c| RelationAttributes { comment: Some(c) });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
}

/// One JSON-patch entry; every create and update is a list of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    pub value: Value,
}

impl PatchOperation {
    pub fn add_field(field: &str, value: impl Into<Value>) -> Self {
        Self {
            op: PatchOp::Add,
            path: format!("/fields/{field}"),
            value: value.into(),
        }
    }

    pub fn replace_field(field: &str, value: impl Into<Value>) -> Self {
        Self {
            op: PatchOp::Replace,
            path: format!("/fields/{field}"),
            value: value.into(),
        }
    }

    pub fn add_relation(relation: Relation) -> Self {
        Self {
            op: PatchOp::Add,
            path: "/relations/-".into(),
            // Relation only holds strings, serialization cannot fail.
            value: serde_json::to_value(relation).unwrap_or(Value::Null),
        }
    }

    pub fn field_name(&self) -> Option<&str> {
        self.path.strip_prefix("/fields/")
    }

    pub fn relation(&self) -> Option<Relation> {
        if self.path != "/relations/-" {
            return None;
        }
        serde_json::from_value(self.value.clone()).ok()
    }
}

/// Comment on a work item, as listed by the comments API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemComment {
    pub id: u64,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct CommentPage {
    pub comments: Vec<WorkItemComment>,
    pub continuation_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_ops_serialize_as_json_patch() {
        let op = PatchOperation::add_field(FIELD_TAGS, "redmine");
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"op": "add", "path": "/fields/System.Tags", "value": "redmine"})
        );
        let op = PatchOperation::replace_field(FIELD_DESCRIPTION, "<p>x</p>");
        assert_eq!(serde_json::to_value(&op).unwrap()["op"], "replace");
    }

    #[test]
    fn relation_op_carries_comment() {
        let rel = Relation::new(RelationKind::Hyperlink, "https://rm/issues/1")
            .with_comment(Some("link to original issue".into()));
        let op = PatchOperation::add_relation(rel.clone());
        assert_eq!(op.path, "/relations/-");
        assert_eq!(
            op.value,
            json!({
                "rel": "Hyperlink",
                "url": "https://rm/issues/1",
                "attributes": {"comment": "link to original issue"}
            })
        );
        assert_eq!(op.relation(), Some(rel));
    }

    #[test]
    fn relation_without_comment_omits_attributes() {
        let op = PatchOperation::add_relation(Relation::new(RelationKind::Related, "u"));
        assert!(op.value.get("attributes").is_none());
        assert_eq!(op.value["rel"], "System.LinkTypes.Related");
    }

    #[test]
    fn has_relation_matches_kind_and_url() {
        let item = WorkItem {
            id: 1,
            url: "u1".into(),
            relations: vec![Relation::new(RelationKind::Related, "u2")],
            ..Default::default()
        };
        assert!(item.has_relation(RelationKind::Related, "u2"));
        assert!(!item.has_relation(RelationKind::HierarchyReverse, "u2"));
        assert!(!item.has_relation(RelationKind::Related, "u3"));
    }
}
