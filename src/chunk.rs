//! Chunk extraction.
//!
//! The orchestrator treats extraction as a black box behind the
//! [`Chunker`] trait: given a file, return chunk boundaries, content and
//! symbols, or fail for that file alone. [`LineChunker`] is the built-in
//! implementation used by the CLI. It cuts a file into line windows and
//! picks up symbol and import lines with simple per-language prefixes.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::checksum::chunk_checksum;
use crate::config::ChunkingConfig;

/// A chunk as produced by a [`Chunker`], before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedChunk {
    pub id: String,
    pub content: String,
    /// 1-based, inclusive.
    pub start_line: i64,
    pub end_line: i64,
    pub language: String,
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub imports: Vec<String>,
    pub dependencies: Vec<String>,
}

impl ExtractedChunk {
    /// `function`, `class`, or `block`, from the symbols found.
    pub fn chunk_type(&self) -> &'static str {
        if !self.classes.is_empty() {
            "class"
        } else if !self.functions.is_empty() {
            "function"
        } else {
            "block"
        }
    }

    pub fn primary_name(&self) -> Option<&str> {
        self.classes
            .first()
            .or_else(|| self.functions.first())
            .map(String::as_str)
    }
}

/// Source-to-chunks extractor.
///
/// `relative_path` is the index key for the file and must be folded into
/// chunk ids (see [`chunk_checksum`]). An `Err` marks this one file as
/// failed; the run continues.
#[async_trait]
pub trait Chunker: Send + Sync {
    async fn chunk_file(&self, path: &Path, relative_path: &str) -> Result<Vec<ExtractedChunk>>;
}

/// Line-window chunker.
pub struct LineChunker {
    max_lines: usize,
    min_lines: usize,
}

impl LineChunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            max_lines: config.max_lines.max(1),
            min_lines: config.min_lines,
        }
    }

    /// Chunk already-loaded text.
    pub fn chunk_text(&self, relative_path: &str, text: &str) -> Vec<ExtractedChunk> {
        let language = language_for_path(relative_path);
        let lines: Vec<&str> = text.lines().collect();
        if lines.is_empty() {
            return Vec::new();
        }

        let mut windows: Vec<(usize, usize)> = Vec::new();
        let mut start = 0;
        while start < lines.len() {
            let end = (start + self.max_lines).min(lines.len());
            windows.push((start, end));
            start = end;
        }

        // A short tail is folded into the window before it.
        if windows.len() > 1 {
            if let Some(&(tail_start, tail_end)) = windows.last() {
                if tail_end - tail_start < self.min_lines {
                    windows.pop();
                    if let Some(prev) = windows.last_mut() {
                        prev.1 = tail_end;
                    }
                }
            }
        }

        let imports: Vec<String> = lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| is_import_line(l))
            .map(str::to_string)
            .collect();

        let mut chunks = Vec::new();
        for (start_idx, end_idx) in windows {
            let window = &lines[start_idx..end_idx];
            if window.iter().all(|l| l.trim().is_empty()) {
                continue;
            }
            let content = window.join("\n");
            let start_line = start_idx as i64 + 1;
            let end_line = end_idx as i64;

            let mut functions = Vec::new();
            let mut classes = Vec::new();
            for line in window {
                match detect_symbol(line) {
                    Some(Symbol::Function(name)) => functions.push(name),
                    Some(Symbol::Class(name)) => classes.push(name),
                    None => {}
                }
            }

            chunks.push(ExtractedChunk {
                id: chunk_checksum(relative_path, &content, start_line, end_line),
                dependencies: extract_dependencies(&content),
                content,
                start_line,
                end_line,
                language: language.to_string(),
                functions,
                classes,
                imports: imports.clone(),
            });
        }

        chunks
    }
}

#[async_trait]
impl Chunker for LineChunker {
    async fn chunk_file(&self, path: &Path, relative_path: &str) -> Result<Vec<ExtractedChunk>> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let text = String::from_utf8(bytes)
            .with_context(|| format!("{} is not valid UTF-8", relative_path))?;
        Ok(self.chunk_text(relative_path, &text))
    }
}

enum Symbol {
    Function(String),
    Class(String),
}

const FUNCTION_PREFIXES: &[&str] = &[
    "pub async fn ",
    "pub(crate) fn ",
    "pub fn ",
    "async fn ",
    "fn ",
    "async def ",
    "def ",
    "export async function ",
    "export default function ",
    "export function ",
    "async function ",
    "function ",
    "func ",
];

const CLASS_PREFIXES: &[&str] = &[
    "pub struct ",
    "pub enum ",
    "pub trait ",
    "struct ",
    "enum ",
    "trait ",
    "impl ",
    "export default class ",
    "export class ",
    "export interface ",
    "class ",
    "interface ",
];

fn detect_symbol(line: &str) -> Option<Symbol> {
    let trimmed = line.trim_start();
    for prefix in FUNCTION_PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return identifier(rest).map(Symbol::Function);
        }
    }
    for prefix in CLASS_PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return identifier(rest).map(Symbol::Class);
        }
    }
    None
}

fn identifier(rest: &str) -> Option<String> {
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn is_import_line(line: &str) -> bool {
    line.starts_with("import ")
        || line.starts_with("use ")
        || line.starts_with("pub use ")
        || line.starts_with("from ")
        || line.starts_with("#include")
        || line.contains("require(")
}

fn extract_dependencies(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| is_import_line(l))
        .map(str::to_string)
        .collect()
}

/// Language name guessed from the file extension.
pub fn language_for_path(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "sh" | "bash" => "bash",
        "md" => "markdown",
        "toml" => "toml",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        _ => "text",
    }
}
