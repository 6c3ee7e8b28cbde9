use std::fmt::Write;

use crit_core::{Reference, ResolvedFinding};
use pulldown_cmark::{html, Event, Options, Parser};

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; max-width: 60rem; margin: 2rem auto; padding: 0 1rem; color: #1f2328; }
header { border-bottom: 1px solid #d0d7de; margin-bottom: 1.5rem; }
.finding { border: 1px solid #d0d7de; border-radius: 6px; padding: 1rem 1.25rem; margin-bottom: 1.25rem; }
.rationale { font-weight: 600; }
.reference { margin: 0.75rem 0; }
.source { font-size: 0.9rem; color: #57606a; }
blockquote { margin: 0.25rem 0 0; padding-left: 1rem; border-left: 3px solid #d0d7de; }
"#;

/// Renders findings as a standalone HTML page. Quotations are Markdown; everything else is
/// escaped.
pub fn render_report(findings: &[ResolvedFinding], generated: &str) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str("<title>Contradiction report</title>\n<style>");
    out.push_str(STYLE);
    out.push_str("</style>\n</head>\n<body>\n<header>\n<h1>Contradiction report</h1>\n");
    let _ = writeln!(
        out,
        "<p>Generated {} &middot; {} finding(s)</p>\n</header>",
        escape(generated),
        findings.len()
    );
    for (index, finding) in findings.iter().enumerate() {
        let _ = writeln!(
            out,
            "<section class=\"finding\">\n<h2>Finding {}</h2>\n<p class=\"rationale\">{}</p>",
            index + 1,
            escape(&finding.rationale)
        );
        for reference in &finding.references {
            render_reference(&mut out, reference);
        }
        out.push_str("</section>\n");
    }
    out.push_str("</body>\n</html>\n");
    out
}

fn render_reference(out: &mut String, reference: &Reference) {
    out.push_str("<div class=\"reference\">\n<div class=\"source\">");
    let label = if reference.title.is_empty() {
        &reference.document
    } else {
        &reference.title
    };
    if is_link(&reference.document) {
        let _ = write!(
            out,
            "<a href=\"{}\">{}</a>",
            escape(&reference.document),
            escape(label)
        );
    } else {
        let _ = write!(
            out,
            "{} <code>{}</code>",
            escape(label),
            escape(&reference.document)
        );
    }
    out.push_str("</div>\n<blockquote>");
    out.push_str(&markdown_to_html(&reference.quotation));
    out.push_str("</blockquote>\n</div>\n");
}

/// Markdown to HTML with raw HTML in the source shown as text.
pub fn markdown_to_html(source: &str) -> String {
    let parser = Parser::new_ext(source, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH)
        .map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            other => other,
        });
    let mut rendered = String::with_capacity(source.len() * 3 / 2);
    html::push_html(&mut rendered, parser);
    rendered
}

fn is_link(document: &str) -> bool {
    document.starts_with("https://") || document.starts_with("http://")
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding() -> ResolvedFinding {
        ResolvedFinding {
            rationale: "Refund window is <30> vs 90 days".to_string(),
            references: vec![
                Reference {
                    document: "https://example.com/refunds?a=1&b=2".to_string(),
                    title: "Refunds".to_string(),
                    quotation: "Refunds within **30 days**".to_string(),
                },
                Reference {
                    document: "returns.html".to_string(),
                    title: String::new(),
                    quotation: "<script>alert(1)</script> 90 days".to_string(),
                },
            ],
        }
    }

    #[test]
    fn quotations_render_markdown_and_text_is_escaped() {
        let html = render_report(&[finding()], "October 16, 2026");
        assert!(html.contains("Generated October 16, 2026"));
        assert!(html.contains("<h2>Finding 1</h2>"));
        assert!(html.contains("Refund window is &lt;30&gt; vs 90 days"));
        assert!(html.contains("<strong>30 days</strong>"));
        assert!(html.contains("href=\"https://example.com/refunds?a=1&amp;b=2\""));
        assert!(html.contains("<code>returns.html</code>"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn empty_report_still_has_a_header() {
        let html = render_report(&[], "today");
        assert!(html.contains("0 finding(s)"));
        assert!(!html.contains("class=\"finding\""));
    }
}
