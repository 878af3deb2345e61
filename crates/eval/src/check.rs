use anyhow::{Context, Result};
use prepare::metrics::CategoryCount;
use prepare::{Category, DatasetRecord, IGNORE_INDEX, SubwordTokenizer};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::scoring::{F1Score, f1_score};

/// Result of checking one record against its known answer text.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordCheck {
    Consistent,
    /// Sentinel span, but the answer is not yes/no.
    NotYesNo { answer: String },
    /// The decoded span does not read as the answer.
    Mismatch {
        expected: String,
        decoded: String,
        score: F1Score,
    },
    /// Span indices fall outside `input_ids`.
    OutOfBounds { start: i64, end: i64, len: usize },
}

/// Decode the labelled span of `record` and compare it with `answer`.
///
/// The answer goes through the same tokenizer first, so casing and other
/// tokenizer normalizations do not count as mismatches.
pub fn check_record(
    record: &DatasetRecord,
    tokenizer: &dyn SubwordTokenizer,
    answer: &str,
) -> Result<RecordCheck> {
    let (start, end) = (record.start_token, record.end_token);

    if start == IGNORE_INDEX && end == IGNORE_INDEX {
        let answer = answer.trim().to_lowercase();
        if answer == "yes" || answer == "no" {
            return Ok(RecordCheck::Consistent);
        }
        return Ok(RecordCheck::NotYesNo { answer });
    }

    let len = record.input_ids.len();
    if start < 0 || end < start || end as usize >= len {
        return Ok(RecordCheck::OutOfBounds { start, end, len });
    }

    let decoded = tokenizer.decode(&record.input_ids[start as usize..=end as usize])?;
    let expected = tokenizer.decode(&tokenizer.encode(answer)?)?;
    let score = f1_score(&expected, &decoded);

    if score.is_perfect() {
        Ok(RecordCheck::Consistent)
    } else {
        Ok(RecordCheck::Mismatch {
            expected,
            decoded,
            score,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LengthStats {
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub max: usize,
}

/// Sanity report over a written dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetAudit {
    pub records: usize,
    pub by_category: Vec<CategoryCount>,
    pub unknown_category: usize,
    /// Records whose span markers disagree with their category.
    pub span_violations: usize,
    pub over_length: usize,
    pub input_length: LengthStats,
}

impl DatasetAudit {
    pub fn is_clean(&self) -> bool {
        self.unknown_category == 0 && self.span_violations == 0 && self.over_length == 0
    }
}

fn span_is_consistent(record: &DatasetRecord, category: Category) -> bool {
    let sentinel = record.start_token == IGNORE_INDEX && record.end_token == IGNORE_INDEX;
    if !category.has_span() {
        return sentinel;
    }
    let (start, end) = (record.start_token, record.end_token);
    start >= 0 && start <= end && (end as usize) < record.input_ids.len()
}

pub fn audit_records<I>(records: I, max_length: Option<usize>) -> DatasetAudit
where
    I: IntoIterator<Item = DatasetRecord>,
{
    let mut counts = [0usize; 5];
    let mut unknown_category = 0;
    let mut span_violations = 0;
    let mut over_length = 0;
    let mut lengths = Vec::new();

    for record in records {
        let len = record.input_ids.len();
        lengths.push(len as f64);
        if max_length.is_some_and(|max| len > max) {
            over_length += 1;
        }

        match record.category() {
            Some(category) => {
                counts[category.code() as usize] += 1;
                if !span_is_consistent(&record, category) {
                    span_violations += 1;
                }
            }
            None => unknown_category += 1,
        }
    }

    lengths.sort_by(|a, b| a.total_cmp(b));
    let input_length = if lengths.is_empty() {
        LengthStats::default()
    } else {
        LengthStats {
            mean: lengths.iter().sum::<f64>() / lengths.len() as f64,
            p50: percentile(&lengths, 50),
            p95: percentile(&lengths, 95),
            max: lengths[lengths.len() - 1] as usize,
        }
    };

    let audit = DatasetAudit {
        records: lengths.len(),
        by_category: Category::ALL
            .iter()
            .map(|&category| CategoryCount {
                category,
                records: counts[category.code() as usize],
            })
            .collect(),
        unknown_category,
        span_violations,
        over_length,
        input_length,
    };

    if !audit.is_clean() {
        tracing::warn!(
            unknown_category = audit.unknown_category,
            span_violations = audit.span_violations,
            over_length = audit.over_length,
            "Dataset audit found problems"
        );
    }

    audit
}

/// Audit a JSONL records file.
pub fn audit_file(path: &Path, max_length: Option<usize>) -> Result<DatasetAudit> {
    let file = File::open(path).context(format!("Failed to open records: {:?}", path))?;

    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context(format!("Failed to read {:?}", path))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: DatasetRecord = serde_json::from_str(&line)
            .context(format!("Invalid record on line {}", i + 1))?;
        records.push(record);
    }

    Ok(audit_records(records, max_length))
}

fn percentile(sorted_data: &[f64], p: usize) -> f64 {
    let index = (p as f64 / 100.0 * sorted_data.len() as f64) as usize;
    sorted_data[index.min(sorted_data.len() - 1)]
}
