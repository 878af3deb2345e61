use crate::error::{ConfigError, PrepareError};
use crate::tokenizer::SubwordTokenizer;

/// `[CLS] question [SEP] document [SEP]` as token ids.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedInput {
    pub input_ids: Vec<u32>,
    /// Index just past the first separator; length of the question prefix.
    pub q_len: usize,
}

impl TokenizedInput {
    pub fn build(
        tokenizer: &dyn SubwordTokenizer,
        question: &str,
        context: &str,
    ) -> anyhow::Result<Self> {
        let question_ids = tokenizer.encode(question)?;
        let context_ids = tokenizer.encode(context)?;

        let mut input_ids = Vec::with_capacity(question_ids.len() + context_ids.len() + 3);
        input_ids.push(tokenizer.cls_token_id());
        input_ids.extend(question_ids);
        input_ids.push(tokenizer.sep_token_id());
        let q_len = input_ids.len();
        input_ids.extend(context_ids);
        input_ids.push(tokenizer.sep_token_id());

        Ok(Self { input_ids, q_len })
    }

    /// Index of the trailing separator; document tokens lie in `q_len..context_end`.
    pub fn context_end(&self) -> usize {
        self.input_ids.len().saturating_sub(1)
    }
}

/// One question-prefixed slice of the input, before labelling.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub input_ids: Vec<u32>,
    /// Offset in the full input of the first content token.
    pub window_start: usize,
    /// Exclusive end of the slice the window may hold, in full-input coordinates.
    pub window_end: usize,
}

pub struct DocumentWindower {
    max_length: usize,
    doc_stride: usize,
    sep_token_id: u32,
}

impl DocumentWindower {
    pub fn new(
        max_length: usize,
        doc_stride: usize,
        sep_token_id: u32,
    ) -> Result<Self, ConfigError> {
        if max_length == 0 {
            return Err(ConfigError::ZeroMaxLength);
        }
        if doc_stride >= max_length {
            return Err(ConfigError::StrideTooLarge {
                doc_stride,
                max_length,
            });
        }
        Ok(Self {
            max_length,
            doc_stride,
            sep_token_id,
        })
    }

    pub fn step(&self) -> usize {
        self.max_length - self.doc_stride
    }

    /// Split `input` into windows of at most `max_length` tokens.
    ///
    /// Windows start at `q_len`, advance by `max_length - doc_stride` and stop
    /// after the one ending in the trailing separator.
    pub fn split(&self, id: &str, input: &TokenizedInput) -> Result<Vec<Window>, PrepareError> {
        let q_len = input.q_len;
        let len = input.input_ids.len();

        if len <= self.max_length {
            return Ok(vec![Window {
                input_ids: input.input_ids.clone(),
                window_start: q_len,
                window_end: len,
            }]);
        }

        let content_len = self.max_length.saturating_sub(q_len);
        if content_len == 0 {
            return Err(PrepareError::QuestionTooLong {
                id: id.to_string(),
                q_len,
                max_length: self.max_length,
            });
        }
        if content_len < self.step() {
            return Err(PrepareError::UncoveredDocument {
                id: id.to_string(),
                q_len,
                doc_stride: self.doc_stride,
            });
        }

        let question = &input.input_ids[..q_len];
        let mut windows = Vec::new();
        let mut start = q_len;

        while start < len {
            let end = (start + content_len).min(len);
            let slice = &input.input_ids[start..end];

            let mut input_ids = Vec::with_capacity(q_len + slice.len());
            input_ids.extend_from_slice(question);
            input_ids.extend_from_slice(slice);
            windows.push(Window {
                input_ids,
                window_start: start,
                window_end: end,
            });

            if slice.last() == Some(&self.sep_token_id) {
                break;
            }
            start += self.step();
        }

        tracing::debug!(
            example_id = %id,
            tokens = len,
            windows = windows.len(),
            "Split document into windows"
        );

        Ok(windows)
    }
}
