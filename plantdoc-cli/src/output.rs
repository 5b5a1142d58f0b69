//! Plain-text rendering of command results.

use std::collections::HashMap;
use std::fmt::Write;
use std::path::Path;

use plantdoc_rag::{Answer, BuildReport};

/// The answer followed by a numbered list of its sources.
pub fn render_answer(answer: &Answer) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", answer.text.trim_end());
    if answer.retrieval.is_empty() {
        return out;
    }

    let _ = writeln!(out, "\nSources:");
    for (i, source) in answer.retrieval.sources().iter().enumerate() {
        let metadata = &source.metadata;
        let label = match (field(metadata, "crop"), field(metadata, "disease")) {
            (Some(crop), Some(disease)) => format!("{crop} / {disease}"),
            _ => field(metadata, "source").unwrap_or("unknown").to_string(),
        };
        let _ = writeln!(out, "  [{}] {label} (score {:.3})", i + 1, source.score);
        let _ = writeln!(out, "      {}", preview(&source.chunk_text, 160));
    }
    out
}

/// Metadata value for `key`, ignoring the key's case (datasets use `Crop`).
fn field<'a>(metadata: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    metadata
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.as_str())
}

/// Summary of an index build.
pub fn render_report(report: &BuildReport, index_dir: &Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Indexed {} document(s) into {}", report.documents, index_dir.display());
    let _ = writeln!(out, "  chunks produced: {}", report.chunks_produced);
    let _ = writeln!(out, "  chunks indexed:  {}", report.chunks_indexed);
    let _ = writeln!(out, "  chunks skipped:  {}", report.chunks_skipped);
    let _ = writeln!(out, "  total entries:   {}", report.entry_count);
    out
}

/// Description of a persisted index.
pub fn render_inspect(
    index_dir: &Path,
    entry_count: usize,
    dimension: Option<usize>,
    embedding_model: Option<&str>,
) -> String {
    format!(
        "Index:           {}\nEntries:         {entry_count}\nDimension:       {}\nEmbedding model: {}\n",
        index_dir.display(),
        dimension.map_or_else(|| "-".to_string(), |d| d.to_string()),
        embedding_model.unwrap_or("-"),
    )
}

/// First `max_chars` characters of `text` on one line.
fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}...")
}
