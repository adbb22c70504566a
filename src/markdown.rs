//! Redmine markdown to the HTML Azure DevOps stores in descriptions and comments.

use std::sync::LazyLock;

use pulldown_cmark::{html, CowStr, Event, LinkType, Options, Parser, Tag, TagEnd, TextMergeStream};
use regex::Regex;

static LIST_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*]").expect("valid list regex"));

static BARE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:https?|ftp)://[^\s<>"']*[^\s<>"'.,;:!?)\]]"#).expect("valid url regex")
});

/// Redmine accepts a list directly under a paragraph line; CommonMark needs a blank
/// line first. Inserts one before every list line whose predecessor is not a list line.
pub fn fix_list_formatting(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        if idx > 0 {
            let prev = lines[idx - 1];
            if LIST_LINE.is_match(line) && !LIST_LINE.is_match(prev) && !prev.trim().is_empty() {
                out.push("");
            }
        }
        out.push(line);
    }
    out.join("\n")
}

fn options() -> Options {
    let mut opts = Options::empty();
    opts.insert(Options::ENABLE_TABLES);
    opts.insert(Options::ENABLE_FOOTNOTES);
    opts.insert(Options::ENABLE_STRIKETHROUGH);
    opts
}

/// Split plain text around bare URLs, turning each URL into an autolink.
fn linkify(text: &str, out: &mut Vec<Event<'static>>) {
    let mut last = 0;
    for m in BARE_URL.find_iter(text) {
        if m.start() > last {
            out.push(Event::Text(CowStr::from(text[last..m.start()].to_string())));
        }
        let url = m.as_str().to_string();
        out.push(Event::Start(Tag::Link {
            link_type: LinkType::Autolink,
            dest_url: CowStr::from(url.clone()),
            title: CowStr::from(String::new()),
            id: CowStr::from(String::new()),
        }));
        out.push(Event::Text(CowStr::from(url)));
        out.push(Event::End(TagEnd::Link));
        last = m.end();
    }
    if last < text.len() {
        out.push(Event::Text(CowStr::from(text[last..].to_string())));
    }
}

/// Render markdown to HTML with tables, footnotes, strikethrough and bare-URL linking.
pub fn to_html(markdown: &str) -> String {
    let mut events: Vec<Event<'static>> = Vec::new();
    // Depth of links and code blocks; text inside them is never linkified.
    let mut no_link_depth = 0usize;

    for event in TextMergeStream::new(Parser::new_ext(markdown, options())) {
        match event {
            Event::Start(tag @ (Tag::Link { .. } | Tag::Image { .. } | Tag::CodeBlock(_))) => {
                no_link_depth += 1;
                events.push(Event::Start(tag.into_static()));
            }
            Event::End(end @ (TagEnd::Link | TagEnd::Image | TagEnd::CodeBlock)) => {
                no_link_depth = no_link_depth.saturating_sub(1);
                events.push(Event::End(end));
            }
            Event::Text(text) if no_link_depth == 0 => linkify(&text, &mut events),
            other => events.push(other.into_static()),
        }
    }

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, events.into_iter());
    out
}

/// List normalization followed by rendering; what every migrated text goes through.
pub fn render_redmine(markdown: &str) -> String {
    to_html(&fix_list_formatting(markdown))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_inserted_before_list() {
        let input = "Steps:\n- one\n- two\nafter";
        assert_eq!(fix_list_formatting(input), "Steps:\n\n- one\n- two\nafter");
    }

    #[test]
    fn star_and_indented_lists_count() {
        let input = "Intro\n  * nested\n  * more";
        assert_eq!(fix_list_formatting(input), "Intro\n\n  * nested\n  * more");
    }

    #[test]
    fn separated_lists_untouched() {
        let input = "Intro\n\n- a\n- b\n\nMiddle\n\n* c";
        assert_eq!(fix_list_formatting(input), input);
    }

    #[test]
    fn list_on_first_line_untouched() {
        let input = "- first\n- second";
        assert_eq!(fix_list_formatting(input), input);
    }

    #[test]
    fn normalization_is_idempotent() {
        let input = "a\n- b\nc\n* d\n- e";
        let once = fix_list_formatting(input);
        assert_eq!(fix_list_formatting(&once), once);
    }

    #[test]
    fn loose_list_renders_as_list() {
        let html = render_redmine("Steps:\n- one\n- two");
        assert!(html.contains("<p>Steps:</p>"));
        assert!(html.contains("<ul>"));
        assert!(html.contains("<li>one</li>"));
    }

    #[test]
    fn tables_render() {
        let html = to_html("| Name | Value |\n| ---- | -----: |\n| Issue | 12 |\n");
        assert!(html.contains("<table>"));
        assert!(html.contains("<td>Issue</td>"));
        assert!(html.contains("<td style=\"text-align: right\">12</td>"));
    }

    #[test]
    fn bare_urls_become_links() {
        let html = to_html("see https://example.com/x?y=1. thanks");
        assert!(html.contains(r#"<a href="https://example.com/x?y=1">https://example.com/x?y=1</a>."#));
    }

    #[test]
    fn urls_in_code_and_links_are_left_alone() {
        let html = to_html("```\nhttps://example.com\n```\n\n[site](https://example.com)");
        assert_eq!(html.matches("<a href").count(), 1);
        assert!(html.contains("<code>https://example.com\n</code>"));
    }

    #[test]
    fn urls_with_underscores_stay_whole() {
        let html = to_html("log at https://ci.example.com/build_logs/a_b");
        assert!(html.contains(r#"href="https://ci.example.com/build_logs/a_b""#));
    }

    #[test]
    fn issue_references_survive_rendering() {
        let html = to_html("fixed in #42");
        assert_eq!(html, "<p>fixed in #42</p>\n");
    }
}
