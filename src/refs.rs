//! Rewriting of `#<issue id>` references through an [`IdMap`].

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::idmap::IdMap;

// The optional `&` lets HTML numeric entities (`&#39;`) be recognised and left alone.
static ISSUE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&?#([0-9]+)").expect("valid issue reference regex"));

/// Result of one rewrite: the new text and the source ids that were remapped, in
/// order of appearance (repeats included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub text: String,
    pub hits: Vec<u64>,
}

impl Rewrite {
    pub fn changed(&self, original: &str) -> bool {
        self.text != original
    }
}

fn source_id(caps: &Captures<'_>) -> Option<u64> {
    if caps[0].starts_with('&') {
        return None;
    }
    let digits = &caps[1];
    // `#012` is not the key "12".
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    digits.parse().ok()
}

/// Replace every `#<id>` whose id is a key of `map` with `#<new id>`. Everything
/// else, including unmapped references, is copied through untouched.
pub fn rewrite_references(text: &str, map: &IdMap) -> Rewrite {
    let mut hits = Vec::new();
    let rewritten = ISSUE_REF.replace_all(text, |caps: &Captures<'_>| {
        match source_id(caps).and_then(|id| map.get(id).map(|item| (id, item))) {
            Some((id, item)) => {
                hits.push(id);
                format!("#{}", item.id)
            }
            None => caps[0].to_string(),
        }
    });
    Rewrite {
        text: rewritten.into_owned(),
        hits,
    }
}

/// Rewrite mapped references in `file` in place. Returns how many were replaced;
/// the file is only rewritten when something changed.
pub fn fix_file(map: &IdMap, file: &Path) -> Result<usize> {
    let original = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let rewrite = rewrite_references(&original, map);
    for hit in &rewrite.hits {
        if let Some(item) = map.get(*hit) {
            tracing::info!(file = %file.display(), "found #{hit}, mapping to #{}", item.id);
        }
    }
    if rewrite.changed(&original) {
        std::fs::write(file, &rewrite.text)
            .with_context(|| format!("Failed to write {}", file.display()))?;
    }
    Ok(rewrite.hits.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> IdMap {
        let mut map = IdMap::new();
        map.insert(12, 1012, "u1012");
        map.insert(123, 1123, "u1123");
        map.insert(5, 1005, "u1005");
        map
    }

    #[test]
    fn replaces_mapped_references_only() {
        let rw = rewrite_references("see #12 and #99, also #5.", &sample_map());
        assert_eq!(rw.text, "see #1012 and #99, also #1005.");
        assert_eq!(rw.hits, vec![12, 5]);
    }

    #[test]
    fn unmapped_text_is_unchanged() {
        let input = "nothing to do #7 #8 here";
        let rw = rewrite_references(input, &sample_map());
        assert_eq!(rw.text, input);
        assert!(rw.hits.is_empty());
        assert!(!rw.changed(input));
    }

    #[test]
    fn shorter_id_does_not_clobber_longer_one() {
        let rw = rewrite_references("#12 #123 #1234", &sample_map());
        assert_eq!(rw.text, "#1012 #1123 #1234");
    }

    #[test]
    fn html_entities_are_not_references() {
        let mut map = IdMap::new();
        map.insert(39, 500, "u500");
        let rw = rewrite_references("it&#39;s #39", &map);
        assert_eq!(rw.text, "it&#39;s #500");
        assert_eq!(rw.hits, vec![39]);
    }

    #[test]
    fn leading_zero_is_not_a_key() {
        let rw = rewrite_references("#012", &sample_map());
        assert_eq!(rw.text, "#012");
    }

    #[test]
    fn repeated_references_all_rewritten() {
        let rw = rewrite_references("#5, #5 and #5", &sample_map());
        assert_eq!(rw.text, "#1005, #1005 and #1005");
        assert_eq!(rw.hits, vec![5, 5, 5]);
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let map = sample_map();
        let first = rewrite_references("fixes #12, relates to #123 and #4", &map);
        let second = rewrite_references(&first.text, &map);
        assert_eq!(second.text, first.text);
        assert!(second.hits.is_empty());
    }

    #[test]
    fn fixes_file_in_place_and_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.md");
        std::fs::write(&file, "# Notes\n\nFixed by #12, not #99.\n").unwrap();

        let map = sample_map();
        assert_eq!(fix_file(&map, &file).unwrap(), 1);
        let once = std::fs::read_to_string(&file).unwrap();
        assert_eq!(once, "# Notes\n\nFixed by #1012, not #99.\n");

        assert_eq!(fix_file(&map, &file).unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), once);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = fix_file(&sample_map(), Path::new("/no/such/file.md")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
