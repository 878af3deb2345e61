use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use walkdir::WalkDir;

use crate::error::IngestError;
use crate::example::{NqRecord, RawExample};
use crate::hotpot::{HotpotExample, adapt_hotpot_example};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    NaturalQuestions,
    Hotpot,
}

impl DatasetKind {
    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::NaturalQuestions => "natural_questions",
            DatasetKind::Hotpot => "hotpot",
        }
    }

    /// Decode one JSONL line of this corpus.
    pub fn parse_line(&self, line: &str, line_no: usize) -> Result<RawExample, IngestError> {
        let parse_error = |reason: String| IngestError::Parse {
            line: line_no,
            id: peek_id(line),
            reason,
        };

        match self {
            DatasetKind::NaturalQuestions => {
                let record: NqRecord =
                    serde_json::from_str(line).map_err(|e| parse_error(e.to_string()))?;
                record.into_example().map_err(parse_error)
            }
            DatasetKind::Hotpot => {
                let record: HotpotExample =
                    serde_json::from_str(line).map_err(|e| parse_error(e.to_string()))?;
                adapt_hotpot_example(record)
            }
        }
    }
}

/// Best-effort id lookup for diagnostics on lines that fail to decode.
fn peek_id(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    match value.get("id")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The `.jsonl` files behind `path`, in the order they are read.
///
/// A file is its own single shard; a directory is walked recursively and its
/// shards sorted by path.
pub fn list_inputs(path: &Path) -> Result<Vec<PathBuf>> {
    let files = if path.is_dir() {
        list_shards(path)?
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        anyhow::bail!("Input path does not exist: {:?}", path);
    };

    if files.is_empty() {
        anyhow::bail!("No .jsonl shards found under {:?}", path);
    }
    Ok(files)
}

fn list_shards(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.context(format!("Failed to walk {:?}", dir))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl") {
            files.push(path.to_path_buf());
        }
    }
    // Shard order must not depend on the filesystem
    files.sort();
    Ok(files)
}

/// Streams examples out of a `.jsonl` file or a directory of `.jsonl` shards.
pub struct ExampleReader {
    kind: DatasetKind,
    pending: VecDeque<PathBuf>,
    current: Option<Lines<BufReader<File>>>,
    current_path: Option<PathBuf>,
    line_no: usize,
}

impl ExampleReader {
    pub fn open(path: &Path, kind: DatasetKind) -> Result<Self> {
        let files = list_inputs(path)?;
        Ok(Self {
            kind,
            pending: files.into(),
            current: None,
            current_path: None,
            line_no: 0,
        })
    }

    /// Read up to `max` examples. An empty batch means the input is exhausted.
    pub async fn next_batch(
        &mut self,
        max: usize,
    ) -> Result<Vec<Result<RawExample, IngestError>>> {
        let mut batch = Vec::with_capacity(max);

        while batch.len() < max {
            let Some(line) = self.next_line().await? else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            batch.push(self.kind.parse_line(&line, self.line_no));
        }

        Ok(batch)
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(lines) = self.current.as_mut() {
                let line = lines
                    .next_line()
                    .await
                    .context(format!("Failed to read {:?}", self.current_path))?;
                match line {
                    Some(line) => {
                        self.line_no += 1;
                        return Ok(Some(line));
                    }
                    None => self.current = None,
                }
            }

            let Some(path) = self.pending.pop_front() else {
                return Ok(None);
            };
            let file = File::open(&path)
                .await
                .context(format!("Failed to open shard: {:?}", path))?;
            tracing::debug!(shard = %path.display(), "Reading shard");
            self.current = Some(BufReader::new(file).lines());
            self.current_path = Some(path);
            self.line_no = 0;
        }
    }
}
