//! Final document assembly.
//!
//! Builds the Markdown and HTML outline from the persisted store. Records
//! are ordered by their start key `(group, sequence)`, never by insertion or
//! planner order, so the result does not depend on how the store was filled.

use std::collections::HashMap;

use crate::models::{ChunkPlan, ChunkRecord, DocumentMeta, StartKey};
use crate::sanitize::escape_html;
use crate::store::ChunkStore;

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledDocument {
    /// Markdown.
    pub structured: String,
    /// Standalone HTML page.
    pub display: String,
}

/// Concatenate every stored record behind a section header.
///
/// `plans` is optional context: when a plan with the same start key exists,
/// its chapter titles are named in the header.
pub fn assemble(plans: &[ChunkPlan], store: &ChunkStore, meta: &DocumentMeta) -> AssembledDocument {
    let titles: HashMap<&StartKey, Vec<String>> = plans
        .iter()
        .map(|p| (p.start_key(), p.group_titles()))
        .collect();

    let title = meta.title.as_deref().unwrap_or("Untitled");
    let records = store.sorted_by_start();

    let mut md = format!("# {} - Outline\n\n", title);
    if let Some(category) = &meta.category {
        md.push_str(&format!("**Category**: {}\n\n", category));
    }
    md.push_str("---\n");

    let mut body = String::new();
    body.push_str(&format!("<h1>{} - Outline</h1>\n", escape_html(title)));
    if let Some(category) = &meta.category {
        body.push_str(&format!(
            "<p class=\"category\"><strong>Category</strong>: {}</p>\n",
            escape_html(category)
        ));
    }
    body.push_str("<hr>\n");

    if records.is_empty() {
        md.push_str("\n_No outline sections yet._\n");
        body.push_str("<p><em>No outline sections yet.</em></p>\n");
    }

    for (idx, record) in records.iter().enumerate() {
        let header = section_header(idx + 1, record, titles.get(record.start_key()));

        md.push_str(&format!("\n## {}\n\n", header));
        md.push_str(record.structured_text.trim());
        md.push('\n');

        body.push_str(&format!(
            "<section class=\"chunk{}\" id=\"part-{}\">\n<h2 class=\"chunk-header\">{}</h2>\n",
            if record.is_failed() { " failed" } else { "" },
            idx + 1,
            escape_html(&header)
        ));
        body.push_str(&strip_fence_residue(&record.display_text));
        body.push_str("\n</section>\n");
    }

    let display = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{} - Outline</title>\n</head>\n<body>\n{}</body>\n</html>\n",
        escape_html(title),
        body
    );

    AssembledDocument {
        structured: md,
        display,
    }
}

fn section_header(ordinal: usize, record: &ChunkRecord, titles: Option<&Vec<String>>) -> String {
    let mut header = format!("Part {} ({} to {})", ordinal, record.start, record.end);
    if let Some(titles) = titles.filter(|t| !t.is_empty()) {
        header.push_str(": ");
        header.push_str(&titles.join(", "));
    }
    header
}

fn strip_fence_residue(html: &str) -> String {
    html.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
