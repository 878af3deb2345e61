pub mod answer;
pub mod cache;
pub mod category;
pub mod config;
pub mod error;
pub mod metrics;
pub mod record;
pub mod remap;
pub mod tokenizer;
pub mod window;

pub use answer::{CanonicalAnswer, IGNORE_INDEX, NO_SPAN, select_answer};
pub use cache::{CacheHit, CacheKey, CacheSlot, ResultCache, input_identity};
pub use category::Category;
pub use config::{AlignmentMode, PrepareConfig};
pub use error::{ConfigError, PrepareError};
pub use metrics::{RunStats, RunSummary, RunTimer};
pub use record::{DatasetRecord, NullDownsampler, RecordWriter};
pub use remap::{LabeledWindow, SpanRemapper, SubTokenSpan};
pub use tokenizer::{HfTokenizer, SubwordTokenizer};
pub use window::{DocumentWindower, TokenizedInput, Window};

use anyhow::{Context, Result};
use ingest::{DatasetKind, ExampleReader, IngestError, RawExample, list_inputs};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one example turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    Records {
        records: Vec<DatasetRecord>,
        windows: usize,
        null_dropped: usize,
    },
    /// The annotation says the document holds no answer.
    NoAnswer,
    /// Several or zero-length annotated spans.
    Ambiguous,
}

/// One dataset split to transform.
#[derive(Debug, Clone)]
pub struct PrepareJob {
    pub dataset: DatasetKind,
    pub split: String,
    pub input: PathBuf,
    pub output: PathBuf,
}

pub struct Preparer {
    config: PrepareConfig,
    tokenizer: Arc<dyn SubwordTokenizer>,
    windower: DocumentWindower,
    downsampler: NullDownsampler,
}

impl Preparer {
    pub fn new(
        config: PrepareConfig,
        tokenizer: Arc<dyn SubwordTokenizer>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let windower = DocumentWindower::new(
            config.window.max_length,
            config.window.doc_stride,
            tokenizer.sep_token_id(),
        )?;
        let downsampler =
            NullDownsampler::new(config.sampling.null_retention, config.sampling.seed);

        Ok(Self {
            config,
            tokenizer,
            windower,
            downsampler,
        })
    }

    pub fn config(&self) -> &PrepareConfig {
        &self.config
    }

    /// Fails when the job's input cannot be listed or stat'ed.
    pub fn cache_key(&self, job: &PrepareJob) -> Result<CacheKey> {
        let shards = list_inputs(&job.input)?;
        Ok(CacheKey {
            dataset: job.dataset.name().to_string(),
            split: job.split.clone(),
            input: input_identity(&shards)?,
            signature: self.config.signature(),
            tokenizer: self.tokenizer.fingerprint(),
        })
    }

    /// Select, window, label and downsample one example.
    pub fn prepare_example(&self, example: &RawExample) -> Result<Prepared, PrepareError> {
        let id = example.id.as_str();
        let answer = select_answer(example)?;

        if answer.is_absent() {
            debug!(example_id = %id, "No answer in document, skipping");
            return Ok(Prepared::NoAnswer);
        }
        if answer.remove_it {
            debug!(example_id = %id, "Ambiguous annotation, skipping");
            return Ok(Prepared::Ambiguous);
        }

        let words = example.context_words();
        let context = words.join(" ");
        let input = TokenizedInput::build(self.tokenizer.as_ref(), &example.question, &context)
            .map_err(|e| PrepareError::tokenizer(id, e))?;
        let windows = self.windower.split(id, &input)?;

        let remapper = SpanRemapper::new(self.tokenizer.as_ref(), self.config.alignment);
        let (span, expected) = match answer.category {
            Category::Short => {
                let span = remapper.locate(id, &answer, &words, &input)?;
                (Some(span), answer.span_text.clone())
            }
            Category::Long => {
                let span = remapper.locate(id, &answer, &words, &input)?;
                let text = words[answer.start_token as usize..=answer.end_token as usize].join(" ");
                (Some(span), text)
            }
            Category::Yes | Category::No | Category::Null => (None, String::new()),
        };

        let labeled =
            remapper.label_windows(id, answer.category, span, &expected, input.q_len, windows)?;
        let windows = labeled.len();
        let (records, null_dropped) = self.downsampler.retain(id, labeled);

        Ok(Prepared::Records {
            records,
            windows,
            null_dropped,
        })
    }

    /// Prepare a batch across `workers` blocking tasks.
    ///
    /// Each worker takes a contiguous shard; results come back in input order.
    pub async fn prepare_batch(
        self: &Arc<Self>,
        examples: Vec<RawExample>,
    ) -> Result<Vec<Result<Prepared, PrepareError>>> {
        if examples.is_empty() {
            return Ok(Vec::new());
        }

        let workers = self.config.concurrency.workers.max(1);
        let shard_size = examples.len().div_ceil(workers);
        let mut remaining = examples.into_iter();
        let mut handles = Vec::with_capacity(workers);

        loop {
            let shard: Vec<RawExample> = remaining.by_ref().take(shard_size).collect();
            if shard.is_empty() {
                break;
            }
            let preparer = Arc::clone(self);
            handles.push(tokio::task::spawn_blocking(move || {
                shard
                    .iter()
                    .map(|example| preparer.prepare_example(example))
                    .collect::<Vec<_>>()
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.extend(handle.await.context("Preparation worker panicked")?);
        }
        Ok(results)
    }
}

fn record_ingest_failure(stats: &RunStats, error: &IngestError) {
    match error {
        IngestError::Parse { .. } => stats.record_malformed(),
        IngestError::AnswerNotFound { .. } => stats.record_answer_not_found(),
    }
    warn!(
        example_id = error.example_id().unwrap_or("?"),
        error = %error,
        "Skipping unreadable example"
    );
}

fn record_outcome(stats: &RunStats, outcome: &Result<Prepared, PrepareError>) {
    match outcome {
        Ok(Prepared::Records {
            windows,
            null_dropped,
            ..
        }) => stats.record_prepared(*windows, *null_dropped),
        Ok(Prepared::NoAnswer) => stats.record_no_answer(),
        Ok(Prepared::Ambiguous) => stats.record_ambiguous(),
        Err(e) => {
            stats.record_failure(e);
            warn!(example_id = %e.example_id(), error = %e, "Skipping example");
        }
    }
}

fn replay_cached(hit: CacheHit, job: &PrepareJob, timer: &RunTimer) -> Result<RunSummary> {
    hit.replay_into(&job.output)?;
    let mut summary = hit.summary;
    summary.run_id = timer.run_id();
    summary.elapsed_ms = timer.elapsed().as_millis() as u64;
    summary.from_cache = true;
    info!(
        dataset = job.dataset.name(),
        split = %job.split,
        records = summary.records_written,
        "Replayed cached records"
    );
    Ok(summary)
}

/// Transform one split end to end, appending records to `job.output`.
///
/// With a cache, a hit replays the stored records instead of recomputing, and a
/// miss fills the cache alongside the output.
pub async fn run_job(
    preparer: &Arc<Preparer>,
    job: &PrepareJob,
    cache: Option<&ResultCache>,
) -> Result<RunSummary> {
    let timer = RunTimer::start();

    let mut fill = None;
    let keyed = cache.and_then(|cache| match preparer.cache_key(job) {
        Ok(key) => Some((cache, key)),
        Err(e) => {
            warn!(error = %e, "Cannot identify input, continuing without cache");
            None
        }
    });
    if let Some((cache, key)) = keyed {
        if let Some(hit) = cache.lookup(&key) {
            return replay_cached(hit, job, &timer);
        }
        match cache.begin_fill(&key).await {
            Ok(CacheSlot::Hit(hit)) => return replay_cached(hit, job, &timer),
            Ok(CacheSlot::Fill(f)) => fill = Some(f),
            Err(e) => warn!(error = %e, "Cache unavailable, continuing without it"),
        }
    }

    info!(
        run_id = %timer.run_id(),
        dataset = job.dataset.name(),
        split = %job.split,
        input = %job.input.display(),
        "Starting preparation"
    );

    let mut reader = ExampleReader::open(&job.input, job.dataset)?;
    let mut output = RecordWriter::append(&job.output)?;
    let stats = RunStats::new();
    let batch_size = preparer.config().concurrency.batch_size;

    loop {
        let batch = reader.next_batch(batch_size).await?;
        if batch.is_empty() {
            break;
        }
        stats.record_read(batch.len());

        let mut examples = Vec::with_capacity(batch.len());
        for parsed in batch {
            match parsed {
                Ok(example) => examples.push(example),
                Err(e) => record_ingest_failure(&stats, &e),
            }
        }

        for outcome in preparer.prepare_batch(examples).await? {
            record_outcome(&stats, &outcome);
            let Ok(Prepared::Records { records, .. }) = outcome else {
                continue;
            };

            for record in &records {
                output.write(record)?;
                if let Some(category) = record.category() {
                    stats.record_written(category);
                }
                if let Some(f) = fill.as_mut() {
                    if let Err(e) = f.writer().write(record) {
                        warn!(error = %e, "Cache write failed, abandoning cache fill");
                        fill = None;
                    }
                }
            }
        }

        output.flush()?;
        debug!(written = output.written(), "Flushed batch");
    }

    let summary = stats.snapshot(&timer);

    if let Some(f) = fill {
        if let Err(e) = f.commit(&summary) {
            warn!(error = %e, "Failed to publish cache entry");
        }
    }

    info!(
        run_id = %summary.run_id,
        examples = summary.examples_read,
        prepared = summary.examples_prepared,
        records = summary.records_written,
        failures = summary.failures.total(),
        elapsed_ms = summary.elapsed_ms,
        "Preparation finished"
    );

    Ok(summary)
}
