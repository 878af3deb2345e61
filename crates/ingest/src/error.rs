use std::fmt;

/// Per-example ingest failure. The reader reports these and keeps going.
#[derive(Debug)]
pub enum IngestError {
    /// Line could not be decoded into an example.
    Parse {
        line: usize,
        id: Option<String>,
        reason: String,
    },
    /// Answer text does not occur in the flattened context and is not yes/no.
    AnswerNotFound {
        id: String,
        answer: String,
        snippet: String,
    },
}

impl IngestError {
    pub fn example_id(&self) -> Option<&str> {
        match self {
            IngestError::Parse { id, .. } => id.as_deref(),
            IngestError::AnswerNotFound { id, .. } => Some(id),
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Parse { line, id, reason } => match id {
                Some(id) => write!(f, "line {line} (id {id}): {reason}"),
                None => write!(f, "line {line}: {reason}"),
            },
            IngestError::AnswerNotFound {
                id,
                answer,
                snippet,
            } => write!(
                f,
                "answer {answer:?} not found in context of {id}: {snippet}..."
            ),
        }
    }
}

impl std::error::Error for IngestError {}
