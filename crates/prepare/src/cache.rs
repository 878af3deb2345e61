use anyhow::{Context, Result};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::metrics::RunSummary;
use crate::record::RecordWriter;

/// Identifies one transformation of one dataset split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub dataset: String,
    pub split: String,
    /// See [`input_identity`].
    pub input: String,
    pub signature: String,
    pub tokenizer: String,
}

impl CacheKey {
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        let parts = [
            &self.dataset,
            &self.split,
            &self.input,
            &self.signature,
            &self.tokenizer,
        ];
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0]);
        }
        hex::encode(&hasher.finalize()[..16])
    }
}

/// Hash of the shard list: canonical path, size and modification time of each file.
///
/// Rewriting or replacing any shard changes the identity.
pub fn input_identity(shards: &[PathBuf]) -> Result<String> {
    let mut hasher = Sha256::new();
    for shard in shards {
        let path = shard
            .canonicalize()
            .context(format!("Failed to resolve input: {:?}", shard))?;
        let meta = std::fs::metadata(&path)
            .context(format!("Failed to stat input: {:?}", path))?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(meta.len().to_le_bytes());
        hasher.update(modified.to_le_bytes());
    }
    Ok(hex::encode(&hasher.finalize()[..16]))
}

/// Cached results on disk. Reads are lock-free; writers of the same key are serialized.
pub struct ResultCache {
    dir: PathBuf,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Cached records of a key, ready to be replayed.
pub struct CacheHit {
    pub records: PathBuf,
    pub summary: RunSummary,
}

/// What a writer gets once it holds the key's lock.
pub enum CacheSlot {
    /// Another writer committed the entry while this one waited.
    Hit(CacheHit),
    Fill(CacheFill),
}

/// In-progress cache fill. Dropping it without `commit` discards the temporary file.
pub struct CacheFill {
    writer: RecordWriter<BufWriter<File>>,
    tmp: PathBuf,
    records: PathBuf,
    summary: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl CacheHit {
    /// Append the cached records to `output`, creating it if needed.
    pub fn replay_into(&self, output: &Path) -> Result<u64> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create output directory: {:?}", parent))?;
        }
        let mut source = File::open(&self.records)
            .context(format!("Failed to open cache file: {:?}", self.records))?;
        let mut sink = OpenOptions::new()
            .create(true)
            .append(true)
            .open(output)
            .context(format!("Failed to open output: {:?}", output))?;
        let bytes = std::io::copy(&mut source, &mut sink)?;
        sink.flush()?;
        Ok(bytes)
    }
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Arc::new(DashMap::new()),
        }
    }

    fn paths(&self, key: &CacheKey) -> (PathBuf, PathBuf) {
        let digest = key.digest();
        (
            self.dir.join(format!("{}.jsonl", digest)),
            self.dir.join(format!("{}.summary.json", digest)),
        )
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<CacheHit> {
        let (records, summary_path) = self.paths(key);
        if !records.is_file() {
            return None;
        }

        let summary = std::fs::read_to_string(&summary_path)
            .ok()
            .and_then(|s| serde_json::from_str::<RunSummary>(&s).ok());

        match summary {
            Some(summary) => Some(CacheHit { records, summary }),
            None => {
                tracing::warn!(
                    path = %summary_path.display(),
                    "Cache entry has no readable summary, ignoring"
                );
                None
            }
        }
    }

    /// Take the per-key write lock, then either return the entry a previous
    /// holder committed or open a temporary file for the records.
    pub async fn begin_fill(&self, key: &CacheKey) -> Result<CacheSlot> {
        let lock = self
            .locks
            .entry(key.digest())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;

        if let Some(hit) = self.lookup(key) {
            return Ok(CacheSlot::Hit(hit));
        }

        std::fs::create_dir_all(&self.dir)
            .context(format!("Failed to create cache directory: {:?}", self.dir))?;
        let (records, summary) = self.paths(key);
        let tmp = records.with_extension("jsonl.tmp");
        let file = File::create(&tmp).context(format!("Failed to create cache file: {:?}", tmp))?;

        Ok(CacheSlot::Fill(CacheFill {
            writer: RecordWriter::new(BufWriter::new(file)),
            tmp,
            records,
            summary,
            _guard: guard,
        }))
    }
}

impl CacheFill {
    pub fn writer(&mut self) -> &mut RecordWriter<BufWriter<File>> {
        &mut self.writer
    }

    /// Publish the records atomically, then the summary that marks the entry valid.
    pub fn commit(mut self, summary: &RunSummary) -> Result<()> {
        self.writer.flush()?;
        std::fs::rename(&self.tmp, &self.records)
            .context(format!("Failed to publish cache file: {:?}", self.records))?;
        let json = serde_json::to_string_pretty(summary)?;
        std::fs::write(&self.summary, json)
            .context(format!("Failed to write cache summary: {:?}", self.summary))?;
        Ok(())
    }
}

impl Drop for CacheFill {
    fn drop(&mut self) {
        if self.tmp.exists() {
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{RunStats, RunTimer};
    use crate::record::DatasetRecord;

    fn key(split: &str) -> CacheKey {
        CacheKey {
            dataset: "natural_questions".to_string(),
            split: split.to_string(),
            input: "input".to_string(),
            signature: "abc".to_string(),
            tokenizer: "f00d".to_string(),
        }
    }

    async fn fill(cache: &ResultCache, key: &CacheKey) -> CacheFill {
        match cache.begin_fill(key).await.unwrap() {
            CacheSlot::Fill(fill) => fill,
            CacheSlot::Hit(_) => panic!("expected an empty slot"),
        }
    }

    fn record() -> DatasetRecord {
        DatasetRecord {
            input_ids: vec![0, 4, 1, 9, 1],
            start_token: 3,
            end_token: 3,
            category: 1,
        }
    }

    #[test]
    fn test_key_digest_is_stable() {
        assert_eq!(key("train").digest(), key("train").digest());
        assert_ne!(key("train").digest(), key("validation").digest());

        let mut other_input = key("train");
        other_input.input = "other".to_string();
        assert_ne!(key("train").digest(), other_input.digest());
    }

    #[test]
    fn test_input_identity_tracks_shard_contents() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jsonl");
        let b = dir.path().join("b.jsonl");
        std::fs::write(&a, "{}\n").unwrap();
        std::fs::write(&b, "{}\n").unwrap();

        let before = input_identity(&[a.clone()]).unwrap();
        assert_eq!(before, input_identity(&[a.clone()]).unwrap());
        assert_ne!(before, input_identity(&[b.clone()]).unwrap());
        assert_ne!(before, input_identity(&[a.clone(), b]).unwrap());

        std::fs::write(&a, "{}\n{}\n").unwrap();
        assert_ne!(before, input_identity(&[a]).unwrap());
    }

    #[tokio::test]
    async fn test_fill_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());
        assert!(cache.lookup(&key("train")).is_none());

        let summary = RunStats::new().snapshot(&RunTimer::start());
        let mut fill = fill(&cache, &key("train")).await;
        fill.writer().write(&record()).unwrap();
        fill.commit(&summary).unwrap();

        let hit = cache.lookup(&key("train")).unwrap();
        assert_eq!(hit.summary, summary);
        let content = std::fs::read_to_string(&hit.records).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(cache.lookup(&key("validation")).is_none());

        let output = dir.path().join("out/train.jsonl");
        hit.replay_into(&output).unwrap();
        hit.replay_into(&output).unwrap();
        assert_eq!(std::fs::read_to_string(output).unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_fill_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());

        {
            let mut fill = fill(&cache, &key("train")).await;
            fill.writer().write(&record()).unwrap();
        }

        assert!(cache.lookup(&key("train")).is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_waiting_writer_sees_committed_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());
        let summary = RunStats::new().snapshot(&RunTimer::start());

        let mut first = fill(&cache, &key("train")).await;
        first.writer().write(&record()).unwrap();

        let waiter_key = key("train");
        let waiter = cache.begin_fill(&waiter_key);
        let committer = async {
            tokio::task::yield_now().await;
            first.commit(&summary).unwrap();
        };
        let (slot, ()) = tokio::join!(waiter, committer);

        let CacheSlot::Hit(hit) = slot.unwrap() else {
            panic!("second writer should replay the committed entry");
        };
        assert_eq!(hit.summary, summary);
    }
}
