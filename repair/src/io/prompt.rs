//! Repair prompt rendering.

use std::path::Path;

use minijinja::{Environment, context};

use crate::error::StageError;

const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");

/// Inputs embedded verbatim into the repair instruction.
#[derive(Debug, Clone)]
pub struct RepairPrompt<'a> {
    pub source_path: &'a Path,
    pub source: &'a str,
    pub report: &'a str,
}

/// Render the single user message sent to the oracle.
pub fn render_repair_prompt(input: &RepairPrompt<'_>) -> Result<String, StageError> {
    let (language, fence_tag) = language_for(input.source_path);
    let mut env = Environment::new();
    env.add_template("repair", REPAIR_TEMPLATE)
        .map_err(template_error)?;
    let template = env.get_template("repair").map_err(template_error)?;
    template
        .render(context! {
            language => language,
            fence_tag => fence_tag,
            source_path => input.source_path.display().to_string(),
            source => input.source,
            report => input.report,
        })
        .map_err(template_error)
}

fn template_error(err: minijinja::Error) -> StageError {
    StageError::Configuration(format!("render repair prompt: {err}"))
}

/// Human language name and fence tag for a source file, by extension.
fn language_for(path: &Path) -> (&'static str, &'static str) {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "py" => ("Python", "python"),
        "rs" => ("Rust", "rust"),
        "js" | "mjs" | "cjs" => ("JavaScript", "javascript"),
        "ts" | "tsx" => ("TypeScript", "typescript"),
        "go" => ("Go", "go"),
        "rb" => ("Ruby", "ruby"),
        "java" => ("Java", "java"),
        _ => ("source", "code"),
    }
}
