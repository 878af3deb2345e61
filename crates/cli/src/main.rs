use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ingest::DatasetKind;
use prepare::{
    AlignmentMode, HfTokenizer, PrepareConfig, PrepareJob, Preparer, ResultCache, RunSummary,
    SubwordTokenizer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Prepare long-document QA datasets for windowed encoders",
    long_about = None
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Turn a raw QA split into windowed training records
    Prepare(PrepareArgs),
    /// Audit a written records file
    Check(CheckArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DatasetArg {
    NaturalQuestions,
    Hotpot,
}

impl From<DatasetArg> for DatasetKind {
    fn from(arg: DatasetArg) -> Self {
        match arg {
            DatasetArg::NaturalQuestions => DatasetKind::NaturalQuestions,
            DatasetArg::Hotpot => DatasetKind::Hotpot,
        }
    }
}

#[derive(Args, Debug)]
struct PrepareArgs {
    #[arg(long, value_enum)]
    dataset: DatasetArg,

    /// Split name, used for the cache key and logs
    #[arg(long, default_value = "train")]
    split: String,

    /// A .jsonl file or a directory of .jsonl shards
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Records are appended to this file
    #[arg(long, value_name = "PATH")]
    output: PathBuf,

    /// HuggingFace tokenizer.json
    #[arg(long, value_name = "PATH")]
    tokenizer: PathBuf,

    /// JSON config file; flags below override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long)]
    max_length: Option<usize>,

    #[arg(long)]
    doc_stride: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Probability of keeping a window without the answer
    #[arg(long, value_name = "P")]
    null_retention: Option<f64>,

    /// Drop examples whose decoded span does not match the answer text
    #[arg(long)]
    strict: bool,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    #[arg(long)]
    no_cache: bool,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[arg(long, value_name = "PATH")]
    records: PathBuf,

    /// Count windows longer than this
    #[arg(long)]
    max_length: Option<usize>,
}

impl PrepareArgs {
    fn load_config(&self) -> Result<PrepareConfig> {
        let mut config = match &self.config {
            Some(path) => PrepareConfig::from_file(path)?,
            None => PrepareConfig::default(),
        };

        if let Some(max_length) = self.max_length {
            config.window.max_length = max_length;
        }
        if let Some(doc_stride) = self.doc_stride {
            config.window.doc_stride = doc_stride;
        }
        if let Some(seed) = self.seed {
            config.sampling.seed = seed;
        }
        if let Some(p) = self.null_retention {
            config.sampling.null_retention = p;
        }
        if self.strict {
            config.alignment = AlignmentMode::Strict;
        }
        if let Some(workers) = self.workers {
            config.concurrency.workers = workers;
        }
        if let Some(batch_size) = self.batch_size {
            config.concurrency.batch_size = batch_size;
        }
        if let Some(dir) = &self.cache_dir {
            config.cache.dir = dir.clone();
        }
        if self.no_cache {
            config.cache.enabled = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn summary_path(output: &Path) -> PathBuf {
    let mut path = output.as_os_str().to_owned();
    path.push(".summary.json");
    PathBuf::from(path)
}

async fn run_prepare(args: PrepareArgs) -> Result<()> {
    // Settings are checked before any input is touched
    let config = args.load_config()?;
    let tokenizer: Arc<dyn SubwordTokenizer> = Arc::new(HfTokenizer::from_file(&args.tokenizer)?);

    let cache = config
        .cache
        .enabled
        .then(|| ResultCache::new(config.cache.dir.clone()));
    let preparer = Arc::new(Preparer::new(config, tokenizer)?);

    let job = PrepareJob {
        dataset: args.dataset.into(),
        split: args.split,
        input: args.input,
        output: args.output,
    };

    let summary: RunSummary = prepare::run_job(&preparer, &job, cache.as_ref()).await?;

    let path = summary_path(&job.output);
    let json = serde_json::to_string_pretty(&summary)?;
    std::fs::write(&path, json).context(format!("Failed to write summary: {:?}", path))?;

    info!(
        summary = %path.display(),
        records = summary.records_written,
        failures = summary.failures.total(),
        from_cache = summary.from_cache,
        "Done"
    );
    Ok(())
}

fn run_check(args: CheckArgs) -> Result<()> {
    let audit = eval::audit_file(&args.records, args.max_length)?;
    println!("{}", serde_json::to_string_pretty(&audit)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Prepare(args) => run_prepare(args).await,
        Commands::Check(args) => run_check(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = parse(&[
            "qa-prep",
            "prepare",
            "--dataset",
            "natural-questions",
            "--input",
            "in.jsonl",
            "--output",
            "out.jsonl",
            "--tokenizer",
            "tokenizer.json",
            "--max-length",
            "512",
            "--doc-stride",
            "128",
            "--strict",
            "--no-cache",
        ]);
        let Commands::Prepare(args) = cli.command else {
            panic!("expected prepare");
        };

        let config = args.load_config().unwrap();
        assert_eq!(config.window.max_length, 512);
        assert_eq!(config.window.doc_stride, 128);
        assert_eq!(config.alignment, AlignmentMode::Strict);
        assert!(!config.cache.enabled);
        assert_eq!(args.split, "train");
    }

    #[test]
    fn test_invalid_settings_fail_before_running() {
        let cli = parse(&[
            "qa-prep",
            "prepare",
            "--dataset",
            "hotpot",
            "--input",
            "in.jsonl",
            "--output",
            "out.jsonl",
            "--tokenizer",
            "tokenizer.json",
            "--max-length",
            "256",
            "--doc-stride",
            "256",
        ]);
        let Commands::Prepare(args) = cli.command else {
            panic!("expected prepare");
        };
        assert!(args.load_config().is_err());
    }

    #[test]
    fn test_summary_sits_next_to_output() {
        assert_eq!(
            summary_path(Path::new("data/nq/train.jsonl")),
            PathBuf::from("data/nq/train.jsonl.summary.json")
        );
    }
}
