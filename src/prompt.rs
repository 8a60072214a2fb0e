//! Prompt construction for outline chunks and per-highlight explanations.
//!
//! Templates are plain text with `{{name}}` placeholders. Built-in defaults
//! can be replaced through `generation.prompt_template` and
//! `batch.prompt_template`.

use anyhow::{Context, Result};
use std::path::Path;

use crate::models::{ChunkPlan, DocumentMeta, InputItem};

pub const DEFAULT_OUTLINE_TEMPLATE: &str = "\
You are helping a reader review the book \"{{title}}\" ({{category}}).

Below are the passages the reader highlighted, grouped by chapter, followed by
the notes the reader wrote on some of them.

Write a structured outline of this part of the book in HTML. Use <h2> and <h3>
for headings and <p> or <ul>/<li> for content. Follow the reader's highlights
closely and weave in the reader's notes where they add something. Output only
the HTML fragment.

## Highlights

{{highlights}}

## Reader notes

{{annotations}}
";

pub const DEFAULT_EXPLAIN_TEMPLATE: &str = "\
The reader of \"{{title}}\" ({{category}}) highlighted this passage in the
chapter \"{{chapter}}\":

{{highlight}}

Reader note: {{annotation}}

In two or three sentences, explain what the passage means and why it matters
in the context of the book. Answer in plain text.
";

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Read `path` if given, else use `default`.
    pub fn load(path: Option<&Path>, default: &str) -> Result<Self> {
        match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read prompt template: {}", p.display()))?;
                Ok(Self::new(text))
            }
            None => Ok(Self::new(default)),
        }
    }

    /// Substitute every `{{name}}`. Unknown placeholders are left as is.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let mut out = self.text.clone();
        for (name, value) in vars {
            out = out.replace(&format!("{{{{{}}}}}", name), value);
        }
        out
    }
}

/// Prompt for one outline chunk.
pub fn outline_prompt(template: &PromptTemplate, plan: &ChunkPlan, meta: &DocumentMeta) -> String {
    let highlights = format_highlights(&plan.members);
    let annotations = format_annotations(&plan.members);
    template.render(&[
        ("title", meta_title(meta)),
        ("category", meta_category(meta)),
        ("highlights", highlights.as_str()),
        ("annotations", annotations.as_str()),
    ])
}

/// Prompt for a single highlight explanation.
pub fn explain_prompt(template: &PromptTemplate, item: &InputItem, meta: &DocumentMeta) -> String {
    let chapter = item
        .group_title
        .clone()
        .unwrap_or_else(|| format!("Group {}", item.group_key));
    template.render(&[
        ("title", meta_title(meta)),
        ("category", meta_category(meta)),
        ("chapter", chapter.as_str()),
        ("highlight", item.text.trim()),
        ("annotation", item.annotation.as_deref().unwrap_or("(none)")),
    ])
}

/// Chapter title lines, each followed by its highlights as `- ` bullets.
fn format_highlights(items: &[InputItem]) -> String {
    let mut out = String::new();
    let mut current_group = None;
    for item in items {
        if current_group != Some(item.group_key) {
            if current_group.is_some() {
                out.push('\n');
            }
            current_group = Some(item.group_key);
            match item.group_title.as_deref().filter(|t| !t.trim().is_empty()) {
                Some(title) => out.push_str(title.trim()),
                None => out.push_str(&format!("Group {}", item.group_key)),
            }
            out.push('\n');
        }
        if item.is_qualifying() {
            out.push_str("- ");
            out.push_str(item.text.trim());
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}

fn format_annotations(items: &[InputItem]) -> String {
    let notes: Vec<String> = items
        .iter()
        .filter_map(|item| {
            let note = item.annotation.as_deref()?.trim();
            if note.is_empty() {
                return None;
            }
            Some(format!("[Highlight] {}\n[Note] {}", item.text.trim(), note))
        })
        .collect();

    if notes.is_empty() {
        "(no annotations)".to_string()
    } else {
        notes.join("\n\n")
    }
}

fn meta_title(meta: &DocumentMeta) -> &str {
    meta.title.as_deref().unwrap_or("Untitled")
}

fn meta_category(meta: &DocumentMeta) -> &str {
    meta.category.as_deref().unwrap_or("uncategorized")
}
