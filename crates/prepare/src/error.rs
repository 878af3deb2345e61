use std::fmt;

/// Invalid configuration. Raised before any example is processed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    ZeroMaxLength,
    StrideTooLarge { doc_stride: usize, max_length: usize },
    RetentionOutOfRange(f64),
    ZeroWorkers,
    ZeroBatchSize,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroMaxLength => write!(f, "max_length must be positive"),
            ConfigError::StrideTooLarge {
                doc_stride,
                max_length,
            } => write!(
                f,
                "doc_stride ({doc_stride}) must be less than max_length ({max_length})"
            ),
            ConfigError::RetentionOutOfRange(p) => {
                write!(f, "null_retention must be within [0, 1], got {p}")
            }
            ConfigError::ZeroWorkers => write!(f, "workers must be at least 1"),
            ConfigError::ZeroBatchSize => write!(f, "batch_size must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failure preparing a single example. Never aborts the batch.
#[derive(Debug)]
pub enum PrepareError {
    MalformedAnnotation {
        id: String,
        field: &'static str,
        reason: String,
    },
    AnswerNotFound {
        id: String,
        snippet: String,
    },
    SpanAlignment {
        id: String,
        expected: String,
        decoded: String,
    },
    /// The sub-token span runs past the document into the trailing separator.
    SpanOutOfRange {
        id: String,
        end: usize,
        context_end: usize,
    },
    QuestionTooLong {
        id: String,
        q_len: usize,
        max_length: usize,
    },
    UncoveredDocument {
        id: String,
        q_len: usize,
        doc_stride: usize,
    },
    Tokenizer {
        id: String,
        source: anyhow::Error,
    },
}

impl PrepareError {
    pub fn example_id(&self) -> &str {
        match self {
            PrepareError::MalformedAnnotation { id, .. }
            | PrepareError::AnswerNotFound { id, .. }
            | PrepareError::SpanAlignment { id, .. }
            | PrepareError::SpanOutOfRange { id, .. }
            | PrepareError::QuestionTooLong { id, .. }
            | PrepareError::UncoveredDocument { id, .. }
            | PrepareError::Tokenizer { id, .. } => id,
        }
    }

    pub fn tokenizer(id: &str, source: anyhow::Error) -> Self {
        PrepareError::Tokenizer {
            id: id.to_string(),
            source,
        }
    }
}

impl fmt::Display for PrepareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepareError::MalformedAnnotation { id, field, reason } => {
                write!(f, "malformed annotation `{field}` in {id}: {reason}")
            }
            PrepareError::AnswerNotFound { id, snippet } => {
                write!(f, "no answer candidate in {id}; context: {snippet}...")
            }
            PrepareError::SpanAlignment {
                id,
                expected,
                decoded,
            } => write!(
                f,
                "span alignment mismatch in {id}: expected {expected:?}, decoded {decoded:?}"
            ),
            PrepareError::SpanOutOfRange {
                id,
                end,
                context_end,
            } => write!(
                f,
                "answer span of {id} ends at token {end}, past the document end {context_end}"
            ),
            PrepareError::QuestionTooLong {
                id,
                q_len,
                max_length,
            } => write!(
                f,
                "question prefix of {id} ({q_len} tokens) leaves no room within max_length {max_length}"
            ),
            PrepareError::UncoveredDocument {
                id,
                q_len,
                doc_stride,
            } => write!(
                f,
                "windows of {id} would leave gaps: doc_stride {doc_stride} is smaller than question prefix {q_len}"
            ),
            PrepareError::Tokenizer { id, source } => {
                write!(f, "tokenizer failed on {id}: {source}")
            }
        }
    }
}

impl std::error::Error for PrepareError {}
