use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareConfig {
    pub window: WindowConfig,
    pub sampling: SamplingConfig,
    pub alignment: AlignmentMode,
    pub concurrency: ConcurrencyConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Hard cap on question + content tokens per window.
    pub max_length: usize,
    /// Step between windows is `max_length - doc_stride`.
    pub doc_stride: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Probability of keeping a window whose answer lies elsewhere.
    pub null_retention: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentMode {
    Lenient, // Log decoded-span mismatches and keep going
    Strict,  // Drop the example on the first mismatch
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub workers: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig {
                max_length: 4096,
                doc_stride: 2048,
            },
            sampling: SamplingConfig {
                null_retention: 0.4,
                seed: 42,
            },
            alignment: AlignmentMode::Lenient,
            concurrency: ConcurrencyConfig {
                workers: std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4),
                batch_size: 256,
            },
            cache: CacheConfig {
                enabled: true,
                dir: PathBuf::from("data/cache"),
            },
        }
    }
}

impl PrepareConfig {
    /// Defaults sized for an encoder with a smaller input budget, keeping half-width overlap.
    pub fn for_encoder(max_length: usize) -> Self {
        let mut config = Self::default();
        config.window.max_length = max_length;
        config.window.doc_stride = max_length / 2;
        config
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {:?}", path))?;
        let config: Self = serde_json::from_str(&content)
            .context(format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.max_length == 0 {
            return Err(ConfigError::ZeroMaxLength);
        }
        if self.window.doc_stride >= self.window.max_length {
            return Err(ConfigError::StrideTooLarge {
                doc_stride: self.window.doc_stride,
                max_length: self.window.max_length,
            });
        }
        let p = self.sampling.null_retention;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::RetentionOutOfRange(p));
        }
        if self.concurrency.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.concurrency.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(())
    }

    /// Hash of every setting that changes the emitted records.
    ///
    /// Worker count, batch size and cache location are excluded: they never
    /// change the output.
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.window.max_length.to_le_bytes());
        hasher.update(self.window.doc_stride.to_le_bytes());
        hasher.update(self.sampling.null_retention.to_le_bytes());
        hasher.update(self.sampling.seed.to_le_bytes());
        hasher.update([self.alignment as u8]);
        hex::encode(&hasher.finalize()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PrepareConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window.max_length, 4096);
        assert_eq!(config.window.doc_stride, 2048);
    }

    #[test]
    fn test_stride_must_be_below_max_length() {
        let mut config = PrepareConfig::default();
        config.window.doc_stride = 4096;
        assert_eq!(
            config.validate(),
            Err(ConfigError::StrideTooLarge {
                doc_stride: 4096,
                max_length: 4096
            })
        );
    }

    #[test]
    fn test_retention_range_checked() {
        let mut config = PrepareConfig::default();
        config.sampling.null_retention = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RetentionOutOfRange(_))
        ));
        config.sampling.null_retention = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_lengths_rejected_when_parsing() {
        let json = r#"{
            "window": {"max_length": -5, "doc_stride": 2},
            "sampling": {"null_retention": 0.4, "seed": 42},
            "alignment": "lenient",
            "concurrency": {"workers": 2, "batch_size": 16},
            "cache": {"enabled": false, "dir": "cache"}
        }"#;
        assert!(serde_json::from_str::<PrepareConfig>(json).is_err());
    }

    #[test]
    fn test_signature_ignores_execution_settings() {
        let a = PrepareConfig::default();
        let mut b = a.clone();
        b.concurrency.workers = 1;
        b.cache.enabled = false;
        assert_eq!(a.signature(), b.signature());

        b.sampling.seed = 7;
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn test_for_encoder_keeps_half_overlap() {
        let config = PrepareConfig::for_encoder(512);
        assert_eq!(config.window.doc_stride, 256);
        assert!(config.validate().is_ok());
    }
}
