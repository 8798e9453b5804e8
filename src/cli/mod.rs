//! Shared CLI utilities for the lockstep binary.

pub mod executor;

use std::path::Path;

/// Prompts used when no `--prompt` or `--file` is given.
pub const PRESET_PROMPTS: &[&str] = &[
    "The capital of France is",
    "An apple a day keeps",
    "In a hole in the ground there lived",
    "The quick brown fox jumps over",
];

/// Initialize tracing/logging to stderr.
///
/// If `disable` is true, no output is produced.
/// Otherwise respects `RUST_LOG` env var, defaulting to INFO.
pub fn init_logging(disable: bool) {
    use tracing_subscriber::EnvFilter;

    if disable {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Build the prompt batch from one of: prompt string, prompt file, or
/// the preset list.
///
/// A single `--prompt` is repeated across the batch. A file contributes
/// one prompt per non-empty line, cycled until the batch is full.
pub fn resolve_prompts(
    prompt: Option<&str>,
    file: Option<&Path>,
    batch_size: usize,
) -> Result<Vec<String>, String> {
    if let Some(text) = prompt {
        return Ok(vec![text.to_string(); batch_size]);
    }

    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read file '{}': {}", path.display(), e))?;
        let lines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if lines.is_empty() {
            return Err(format!("No prompts found in '{}'", path.display()));
        }
        return Ok(cycle_to_batch(&lines, batch_size));
    }

    Ok(cycle_to_batch(PRESET_PROMPTS, batch_size))
}

fn cycle_to_batch(source: &[&str], batch_size: usize) -> Vec<String> {
    (0..batch_size)
        .map(|i| source[i % source.len()].to_string())
        .collect()
}
