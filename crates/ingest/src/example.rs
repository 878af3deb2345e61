use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One token of the source document, flagged when it is HTML markup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocToken {
    pub token: String,
    pub is_markup: bool,
}

impl DocToken {
    pub fn text(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            is_markup: false,
        }
    }

    pub fn markup(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            is_markup: true,
        }
    }
}

/// A single annotation candidate as it appears in the corpus.
///
/// Fields stay as raw JSON values: short-answer candidates carry lists,
/// long-answer candidates carry scalars, and deciding whether a shape is
/// acceptable is the answer selector's job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerCandidate {
    #[serde(default)]
    pub start_token: Value,
    #[serde(default)]
    pub end_token: Value,
    #[serde(default)]
    pub start_byte: Value,
    #[serde(default)]
    pub end_byte: Value,
    #[serde(default)]
    pub text: Value,
}

impl AnswerCandidate {
    /// Short-answer candidate covering raw tokens `[start, end)`.
    pub fn short_span(start: i64, end: i64, text: &str) -> Self {
        Self {
            start_token: Value::from(vec![start]),
            end_token: Value::from(vec![end]),
            start_byte: Value::from(vec![-1]),
            end_byte: Value::from(vec![-1]),
            text: Value::from(vec![text]),
        }
    }

    /// Long-answer candidate covering raw tokens `[start, end)`; `-1` marks "no long answer".
    pub fn long_span(start: i64, end: i64) -> Self {
        Self {
            start_token: Value::from(start),
            end_token: Value::from(end),
            start_byte: Value::from(-1),
            end_byte: Value::from(-1),
            text: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(default)]
    pub short_answers: Vec<AnswerCandidate>,
    #[serde(default)]
    pub long_answer: Vec<AnswerCandidate>,
    /// `1` = yes, `0` = no, `-1` = not a yes/no question.
    #[serde(default)]
    pub yes_no_answer: Vec<i64>,
}

impl Annotations {
    pub fn yes_no(&self) -> Option<bool> {
        if self.yes_no_answer.contains(&1) {
            Some(true)
        } else if self.yes_no_answer.contains(&0) {
            Some(false)
        } else {
            None
        }
    }
}

/// A question over a long tokenized document, with its candidate annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExample {
    pub id: String,
    pub question: String,
    pub document: Vec<DocToken>,
    pub annotations: Annotations,
}

impl RawExample {
    /// Document words with markup removed, in order.
    pub fn context_words(&self) -> Vec<&str> {
        self.document
            .iter()
            .filter(|t| !t.is_markup)
            .map(|t| t.token.as_str())
            .collect()
    }

    pub fn markup_count(&self) -> usize {
        self.document.iter().filter(|t| t.is_markup).count()
    }
}

// Natural Questions as exported by HuggingFace `datasets`.

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ExampleId {
    Text(String),
    Number(i64),
}

impl ExampleId {
    pub(crate) fn into_string(self) -> String {
        match self {
            ExampleId::Text(s) => s,
            ExampleId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct NqRecord {
    pub id: ExampleId,
    pub question: NqQuestion,
    pub document: NqDocument,
    pub annotations: Annotations,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NqQuestion {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NqDocument {
    pub tokens: NqTokens,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NqTokens {
    pub token: Vec<String>,
    pub is_html: Vec<bool>,
}

impl NqRecord {
    pub(crate) fn into_example(self) -> Result<RawExample, String> {
        let NqTokens { token, is_html } = self.document.tokens;
        if token.len() != is_html.len() {
            return Err(format!(
                "{} tokens but {} markup flags",
                token.len(),
                is_html.len()
            ));
        }

        let document = token
            .into_iter()
            .zip(is_html)
            .map(|(token, is_markup)| DocToken { token, is_markup })
            .collect();

        Ok(RawExample {
            id: self.id.into_string(),
            question: self.question.text,
            document,
            annotations: self.annotations,
        })
    }
}
