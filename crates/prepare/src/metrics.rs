use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use uuid::Uuid;

use crate::category::Category;
use crate::error::PrepareError;

pub struct RunStats {
    // Examples
    examples_read: AtomicUsize,
    examples_prepared: AtomicUsize,
    skipped_no_answer: AtomicUsize,
    skipped_ambiguous: AtomicUsize,

    // Failures
    malformed: AtomicUsize,
    answer_not_found: AtomicUsize,
    alignment_failures: AtomicUsize,
    other_failures: AtomicUsize,

    // Windows
    windows_emitted: AtomicUsize,
    null_windows_dropped: AtomicUsize,
    records_by_category: [AtomicUsize; 5],
}

impl RunStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            examples_read: AtomicUsize::new(0),
            examples_prepared: AtomicUsize::new(0),
            skipped_no_answer: AtomicUsize::new(0),
            skipped_ambiguous: AtomicUsize::new(0),
            malformed: AtomicUsize::new(0),
            answer_not_found: AtomicUsize::new(0),
            alignment_failures: AtomicUsize::new(0),
            other_failures: AtomicUsize::new(0),
            windows_emitted: AtomicUsize::new(0),
            null_windows_dropped: AtomicUsize::new(0),
            records_by_category: Default::default(),
        })
    }

    pub fn record_read(&self, count: usize) {
        self.examples_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_no_answer(&self) {
        self.skipped_no_answer.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ambiguous(&self) {
        self.skipped_ambiguous.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_answer_not_found(&self) {
        self.answer_not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, error: &PrepareError) {
        let counter = match error {
            PrepareError::MalformedAnnotation { .. } => &self.malformed,
            PrepareError::AnswerNotFound { .. } => &self.answer_not_found,
            PrepareError::SpanAlignment { .. } | PrepareError::SpanOutOfRange { .. } => {
                &self.alignment_failures
            }
            PrepareError::QuestionTooLong { .. }
            | PrepareError::UncoveredDocument { .. }
            | PrepareError::Tokenizer { .. } => &self.other_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prepared(&self, windows: usize, null_dropped: usize) {
        self.examples_prepared.fetch_add(1, Ordering::Relaxed);
        self.windows_emitted.fetch_add(windows, Ordering::Relaxed);
        self.null_windows_dropped.fetch_add(null_dropped, Ordering::Relaxed);
    }

    pub fn record_written(&self, category: Category) {
        self.records_by_category[category.code() as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, run: &RunTimer) -> RunSummary {
        let by_category: Vec<CategoryCount> = Category::ALL
            .iter()
            .map(|&category| CategoryCount {
                category,
                records: self.records_by_category[category.code() as usize].load(Ordering::Relaxed),
            })
            .collect();
        let records_written = by_category.iter().map(|c| c.records).sum();

        let failures = FailureCounts {
            malformed: self.malformed.load(Ordering::Relaxed),
            answer_not_found: self.answer_not_found.load(Ordering::Relaxed),
            alignment: self.alignment_failures.load(Ordering::Relaxed),
            other: self.other_failures.load(Ordering::Relaxed),
        };

        RunSummary {
            run_id: run.run_id,
            examples_read: self.examples_read.load(Ordering::Relaxed),
            examples_prepared: self.examples_prepared.load(Ordering::Relaxed),
            skipped_no_answer: self.skipped_no_answer.load(Ordering::Relaxed),
            skipped_ambiguous: self.skipped_ambiguous.load(Ordering::Relaxed),
            failures,
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            null_windows_dropped: self.null_windows_dropped.load(Ordering::Relaxed),
            records_written,
            by_category,
            elapsed_ms: run.elapsed().as_millis() as u64,
            from_cache: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub examples_read: usize,
    pub examples_prepared: usize,
    pub skipped_no_answer: usize,
    pub skipped_ambiguous: usize,
    pub failures: FailureCounts,
    pub windows_emitted: usize,
    pub null_windows_dropped: usize,
    pub records_written: usize,
    pub by_category: Vec<CategoryCount>,
    pub elapsed_ms: u64,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureCounts {
    pub malformed: usize,
    pub answer_not_found: usize,
    pub alignment: usize,
    pub other: usize,
}

impl FailureCounts {
    pub fn total(&self) -> usize {
        self.malformed + self.answer_not_found + self.alignment + self.other
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: Category,
    pub records: usize,
}

pub struct RunTimer {
    run_id: Uuid,
    start: Instant,
}

impl RunTimer {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            start: Instant::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
