//! Prompt rendering for the concrete tasks.
//!
//! Templates are minijinja sources embedded at compile time. Rendered output
//! is split on `<!-- section:KEY required|droppable -->` markers so a byte
//! budget can drop the least useful sections before anything is truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::Environment;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

/// Droppable sections, least useful first.
const DROP_ORDER: [&str; 3] = ["examples", "avoid", "workspace"];

const TRUNCATION_MARKER: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex is valid")
});

/// Template engine wrapper around minijinja.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }

    /// Register a template, failing on syntax errors.
    pub fn with_template(mut self, name: &'static str, source: &'static str) -> Result<Self> {
        self.env
            .add_template(name, source)
            .with_context(|| format!("load prompt template {name}"))?;
        Ok(self)
    }

    pub fn render<C: Serialize>(&self, name: &str, ctx: C) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .with_context(|| format!("unknown prompt template {name}"))?;
        template
            .render(ctx)
            .with_context(|| format!("render prompt template {name}"))
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone, PartialEq)]
struct ParsedSection {
    key: String,
    /// Required sections are never dropped, only truncated as a last resort.
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(matches.len());

    for (i, caps) in matches.iter().enumerate() {
        let (Some(marker), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[marker.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Drop droppable sections in [`DROP_ORDER`] until the prompt fits, then
/// truncate the last section if it still does not.
fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            let dropped = sections.remove(idx);
            debug!(
                section = key,
                bytes_dropped = dropped.content.len(),
                "dropped section for budget"
            );
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(last) = sections.last_mut() else {
        return;
    };
    let other_len = total - last.content.len();
    let allowed = budget.saturating_sub(other_len);
    let before_len = last.content.len();
    if allowed > TRUNCATION_MARKER.len() {
        truncate_at_char_boundary(&mut last.content, allowed - TRUNCATION_MARKER.len());
        last.content.push_str(TRUNCATION_MARKER);
    } else {
        truncate_at_char_boundary(&mut last.content, allowed);
    }
    debug!(
        section = %last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn truncate_at_char_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Renders templates into prompts within a byte budget.
#[derive(Debug)]
pub struct PromptBuilder {
    engine: PromptEngine,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(engine: PromptEngine, budget_bytes: usize) -> Self {
        Self {
            engine,
            budget_bytes,
        }
    }

    pub fn build<C: Serialize>(&self, name: &str, ctx: C) -> Result<PromptPack> {
        let rendered = self.engine.render(name, ctx)?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(PromptPack {
            content: render_sections(&sections),
        })
    }
}

/// A rendered prompt ready to send to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    pub fn render(&self) -> String {
        self.content.clone()
    }

    pub fn into_string(self) -> String {
        self.content
    }
}
