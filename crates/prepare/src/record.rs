use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::category::Category;
use crate::remap::LabeledWindow;

/// Persisted form of one retained window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub input_ids: Vec<u32>,
    pub start_token: i64,
    pub end_token: i64,
    pub category: u8,
}

impl DatasetRecord {
    pub fn from_window(window: LabeledWindow) -> Self {
        Self {
            input_ids: window.input_ids,
            start_token: window.start_token,
            end_token: window.end_token,
            category: window.category.code(),
        }
    }

    pub fn category(&self) -> Option<Category> {
        Category::from_code(self.category)
    }
}

/// Drops most windows whose answer lies elsewhere.
///
/// Every example gets its own generator seeded from `sha256(seed ‖ example_id)`,
/// so the retained set does not depend on processing order or worker count.
#[derive(Debug, Clone)]
pub struct NullDownsampler {
    retention: f64,
    seed: u64,
}

impl NullDownsampler {
    pub fn new(retention: f64, seed: u64) -> Self {
        Self { retention, seed }
    }

    pub fn rng_for(&self, example_id: &str) -> StdRng {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(example_id.as_bytes());
        let digest = hasher.finalize();
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        StdRng::from_seed(seed)
    }

    /// Keep span and yes/no windows; keep null windows with probability `retention`.
    /// Returns the records and the number of null windows dropped.
    pub fn retain(
        &self,
        example_id: &str,
        windows: Vec<LabeledWindow>,
    ) -> (Vec<DatasetRecord>, usize) {
        let mut rng = self.rng_for(example_id);
        let mut dropped = 0;
        let mut records = Vec::with_capacity(windows.len());

        for window in windows {
            let keep = match window.category {
                Category::Null => rng.gen_bool(self.retention),
                Category::Short | Category::Long | Category::Yes | Category::No => true,
            };
            if keep {
                records.push(DatasetRecord::from_window(window));
            } else {
                dropped += 1;
            }
        }

        (records, dropped)
    }
}

/// Append-only JSONL sink, one record per line.
pub struct RecordWriter<W: Write> {
    inner: W,
    written: usize,
}

impl RecordWriter<BufWriter<File>> {
    pub fn append(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create output directory: {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context(format!("Failed to open output: {:?}", path))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn write(&mut self, record: &DatasetRecord) -> Result<()> {
        serde_json::to_writer(&mut self.inner, record).context("Failed to serialize record")?;
        self.inner.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush().context("Failed to flush records")
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
