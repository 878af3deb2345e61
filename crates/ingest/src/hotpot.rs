use serde::Deserialize;

use crate::error::IngestError;
use crate::example::{AnswerCandidate, Annotations, DocToken, RawExample};

const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct HotpotExample {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub context: HotpotContext,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HotpotContext {
    #[serde(default)]
    pub title: Vec<String>,
    pub sentences: Vec<Vec<String>>,
}

/// Collapse every whitespace run to a single space.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Locate `answer` in `context` as a word span `[start, end)`.
///
/// Both inputs must already be whitespace-normalized. The start word is the
/// number of spaces before the first occurrence, so an answer that begins
/// mid-word is attributed to the word containing it.
pub fn locate_answer(context: &str, answer: &str) -> Option<(usize, usize)> {
    let char_start = context.find(answer)?;
    let start = context[..char_start].matches(' ').count();
    let end = start + answer.split_whitespace().count();
    Some((start, end))
}

/// Convert a HotpotQA example into the Natural Questions shaped `RawExample`.
pub fn adapt_hotpot_example(example: HotpotExample) -> Result<RawExample, IngestError> {
    let paragraphs: Vec<String> = example
        .context
        .sentences
        .iter()
        .map(|sentences| sentences.join(" "))
        .collect();
    let context = normalize_whitespace(&paragraphs.join(" "));
    let answer = normalize_whitespace(&example.answer);

    let yes_no_answer = match answer.as_str() {
        "yes" => vec![1],
        "no" => vec![0],
        _ => vec![-1],
    };

    let (start, end) = match locate_answer(&context, &answer) {
        Some((start, end)) => (start as i64, end as i64),
        None if yes_no_answer[0] >= 0 => (-1, -1),
        None => {
            return Err(IngestError::AnswerNotFound {
                id: example.id,
                answer,
                snippet: context.chars().take(SNIPPET_CHARS).collect(),
            });
        }
    };

    let document = context.split(' ').filter(|w| !w.is_empty()).map(DocToken::text).collect();

    Ok(RawExample {
        id: example.id,
        question: example.question,
        document,
        annotations: Annotations {
            short_answers: vec![AnswerCandidate::short_span(start, end, &answer)],
            long_answer: Vec::new(),
            yes_no_answer,
        },
    })
}
