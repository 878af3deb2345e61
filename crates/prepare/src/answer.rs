use ingest::{AnswerCandidate, DocToken, RawExample};
use serde_json::Value;

use crate::category::Category;
use crate::error::PrepareError;

/// Example-level "no span" marker.
pub const NO_SPAN: i64 = -1;
/// Span marker ignored by the training loss; used for yes/no answers and empty windows.
pub const IGNORE_INDEX: i64 = -100;

const YES_NO_TEXT: &str = "<cls>";
const SNIPPET_CHARS: usize = 200;

/// The single authoritative answer of an example.
///
/// `start_token`/`end_token` index the markup-free word sequence and are inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalAnswer {
    pub category: Category,
    pub start_token: i64,
    pub end_token: i64,
    pub span_text: String,
    /// The annotations were ambiguous; the example must not be windowed.
    pub remove_it: bool,
}

impl CanonicalAnswer {
    fn yes_no(yes: bool) -> Self {
        Self {
            category: if yes { Category::Yes } else { Category::No },
            start_token: IGNORE_INDEX,
            end_token: IGNORE_INDEX,
            span_text: YES_NO_TEXT.to_string(),
            remove_it: false,
        }
    }

    /// The document holds no answer at all; the whole example is dropped.
    pub fn is_absent(&self) -> bool {
        self.category == Category::Null
    }
}

/// Rank structure over markup flags: `before[i]` counts markup tokens in `[0, i)`.
pub struct MarkupIndex {
    before: Vec<usize>,
}

impl MarkupIndex {
    pub fn new(tokens: &[DocToken]) -> Self {
        let mut before = Vec::with_capacity(tokens.len() + 1);
        let mut count = 0;
        before.push(0);
        for token in tokens {
            if token.is_markup {
                count += 1;
            }
            before.push(count);
        }
        Self { before }
    }

    /// Re-express a raw-stream boundary in the markup-free stream.
    pub fn to_clean(&self, raw: i64) -> i64 {
        if raw < 0 {
            return raw;
        }
        let last = self.before.len() - 1;
        let i = (raw as usize).min(last);
        raw - self.before[i] as i64
    }
}

/// One candidate's span lists after shape validation.
#[derive(Debug)]
struct CandidateSpans {
    start: Vec<i64>,
    end: Vec<i64>,
}

fn as_list<'a>(
    id: &str,
    field: &'static str,
    value: &'a Value,
    wrap_scalar: bool,
) -> Result<Vec<&'a Value>, PrepareError> {
    match value {
        Value::Array(items) => Ok(items.iter().collect()),
        Value::Null => Err(malformed(id, field, "missing")),
        scalar if wrap_scalar => Ok(vec![scalar]),
        other => Err(malformed(id, field, &format!("expected a list, got {other}"))),
    }
}

fn malformed(id: &str, field: &'static str, reason: &str) -> PrepareError {
    PrepareError::MalformedAnnotation {
        id: id.to_string(),
        field,
        reason: reason.to_string(),
    }
}

fn int_list(
    id: &str,
    field: &'static str,
    value: &Value,
    wrap_scalar: bool,
) -> Result<Vec<i64>, PrepareError> {
    as_list(id, field, value, wrap_scalar)?
        .into_iter()
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| malformed(id, field, &format!("non-integer entry {v}")))
        })
        .collect()
}

/// Validate the five annotation fields. Long-answer candidates store scalars,
/// which are lifted into one-element lists.
fn parse_candidate(
    id: &str,
    candidate: &AnswerCandidate,
    is_long: bool,
) -> Result<CandidateSpans, PrepareError> {
    let start = int_list(id, "start_token", &candidate.start_token, is_long)?;
    let end = int_list(id, "end_token", &candidate.end_token, is_long)?;
    int_list(id, "start_byte", &candidate.start_byte, is_long)?;
    int_list(id, "end_byte", &candidate.end_byte, is_long)?;

    // Long answers are not rendered as literal text
    if !is_long {
        as_list(id, "text", &candidate.text, false)?;
    }

    Ok(CandidateSpans { start, end })
}

/// First candidate with a non-empty start list wins; otherwise the last one is kept.
fn choose_first(
    id: &str,
    candidates: &[AnswerCandidate],
    is_long: bool,
) -> Result<Option<CandidateSpans>, PrepareError> {
    let mut chosen = None;
    for candidate in candidates {
        let spans = parse_candidate(id, candidate, is_long)?;
        let qualifies = !spans.start.is_empty();
        chosen = Some(spans);
        if qualifies {
            break;
        }
    }
    Ok(chosen)
}

/// Pick exactly one canonical answer for `example`.
pub fn select_answer(example: &RawExample) -> Result<CanonicalAnswer, PrepareError> {
    let id = example.id.as_str();
    let annotations = &example.annotations;

    if let Some(yes) = annotations.yes_no() {
        return Ok(CanonicalAnswer::yes_no(yes));
    }

    let (category, spans) = match choose_first(id, &annotations.short_answers, false)? {
        Some(short) if !short.start.is_empty() => (Category::Short, short),
        _ => match choose_first(id, &annotations.long_answer, true)? {
            Some(long) if !long.start.is_empty() => (Category::Long, long),
            _ => {
                let words = example.context_words();
                let context = words.join(" ");
                return Err(PrepareError::AnswerNotFound {
                    id: id.to_string(),
                    snippet: context.chars().take(SNIPPET_CHARS).collect(),
                });
            }
        },
    };

    let remove_it = spans.start.len() > 1 || spans.start == spans.end;

    let raw_start = spans.start[0];
    let raw_end = spans
        .end
        .first()
        .copied()
        .ok_or_else(|| malformed(id, "end_token", "empty list"))?;

    if raw_start == NO_SPAN {
        return Ok(CanonicalAnswer {
            category: Category::Null,
            start_token: NO_SPAN,
            end_token: NO_SPAN,
            span_text: String::new(),
            remove_it,
        });
    }

    if raw_start < 0 || raw_end < raw_start || raw_end as usize > example.document.len() {
        return Err(malformed(
            id,
            "end_token",
            &format!(
                "span [{raw_start}, {raw_end}) outside document of {} tokens",
                example.document.len()
            ),
        ));
    }

    let markup = MarkupIndex::new(&example.document);
    let start = markup.to_clean(raw_start);
    let end_exclusive = markup.to_clean(raw_end);

    let span_text = match category {
        Category::Short => {
            let words = example.context_words();
            words[start as usize..end_exclusive as usize].join(" ")
        }
        Category::Long | Category::Null | Category::Yes | Category::No => String::new(),
    };

    // Zero-length spans are already flagged; keep start <= end regardless
    let end_token = (end_exclusive - 1).max(start);

    tracing::debug!(
        example_id = %id,
        category = %category,
        raw_start,
        raw_end,
        start,
        end = end_token,
        "Selected canonical answer"
    );

    Ok(CanonicalAnswer {
        category,
        start_token: start,
        end_token,
        span_text,
        remove_it,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::{Annotations, DocToken};
    use serde_json::json;

    fn document() -> Vec<DocToken> {
        vec![
            DocToken::markup("<P>"),
            DocToken::text("Acme"),
            DocToken::text("was"),
            DocToken::markup("<b>"),
            DocToken::text("founded"),
            DocToken::markup("</b>"),
            DocToken::text("by"),
            DocToken::text("Jane"),
            DocToken::text("Doe"),
            DocToken::markup("</P>"),
        ]
    }

    fn example(annotations: Annotations) -> RawExample {
        RawExample {
            id: "ex-1".to_string(),
            question: "who founded acme".to_string(),
            document: document(),
            annotations,
        }
    }

    #[test]
    fn test_markup_index_counts_prefix() {
        let index = MarkupIndex::new(&document());
        assert_eq!(index.to_clean(0), 0);
        assert_eq!(index.to_clean(1), 0);
        assert_eq!(index.to_clean(4), 2);
        assert_eq!(index.to_clean(7), 4);
        assert_eq!(index.to_clean(10), 6);
        assert_eq!(index.to_clean(-1), -1);
    }

    #[test]
    fn test_yes_no_takes_precedence() {
        let answer = select_answer(&example(Annotations {
            short_answers: vec![AnswerCandidate::short_span(7, 9, "Jane Doe")],
            yes_no_answer: vec![1],
            ..Default::default()
        }))
        .unwrap();

        assert_eq!(answer.category, Category::Yes);
        assert_eq!(answer.start_token, IGNORE_INDEX);
        assert_eq!(answer.end_token, IGNORE_INDEX);
        assert_eq!(answer.span_text, "<cls>");
        assert!(!answer.remove_it);

        let answer = select_answer(&example(Annotations {
            yes_no_answer: vec![0],
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(answer.category, Category::No);
    }

    #[test]
    fn test_short_answer_corrected_for_markup() {
        let answer = select_answer(&example(Annotations {
            short_answers: vec![AnswerCandidate::short_span(7, 9, "Jane Doe")],
            long_answer: vec![AnswerCandidate::long_span(0, 10)],
            yes_no_answer: vec![-1],
        }))
        .unwrap();

        assert_eq!(answer.category, Category::Short);
        assert_eq!(answer.start_token, 4);
        assert_eq!(answer.end_token, 5);
        assert_eq!(answer.span_text, "Jane Doe");
        assert!(!answer.remove_it);
    }

    #[test]
    fn test_first_qualifying_short_candidate_wins() {
        let empty = AnswerCandidate {
            start_token: json!([]),
            end_token: json!([]),
            start_byte: json!([]),
            end_byte: json!([]),
            text: json!([]),
        };
        let answer = select_answer(&example(Annotations {
            short_answers: vec![
                empty,
                AnswerCandidate::short_span(4, 5, "founded"),
                AnswerCandidate::short_span(7, 9, "Jane Doe"),
            ],
            ..Default::default()
        }))
        .unwrap();

        assert_eq!(answer.span_text, "founded");
        assert_eq!((answer.start_token, answer.end_token), (2, 2));
    }

    #[test]
    fn test_falls_back_to_long_answer() {
        let answer = select_answer(&example(Annotations {
            short_answers: Vec::new(),
            long_answer: vec![AnswerCandidate::long_span(1, 9)],
            yes_no_answer: vec![-1],
        }))
        .unwrap();

        assert_eq!(answer.category, Category::Long);
        assert_eq!((answer.start_token, answer.end_token), (0, 5));
        assert!(answer.span_text.is_empty());
    }

    #[test]
    fn test_missing_long_answer_is_absent() {
        let answer = select_answer(&example(Annotations {
            long_answer: vec![AnswerCandidate::long_span(-1, -1)],
            ..Default::default()
        }))
        .unwrap();

        assert!(answer.is_absent());
        assert_eq!(answer.start_token, NO_SPAN);
    }

    #[test]
    fn test_no_candidates_is_answer_not_found() {
        let err = select_answer(&example(Annotations::default())).unwrap_err();
        assert!(matches!(err, PrepareError::AnswerNotFound { .. }));
    }

    #[test]
    fn test_multiple_starts_marked_ambiguous() {
        let candidate = AnswerCandidate {
            start_token: json!([4, 7]),
            end_token: json!([5, 9]),
            start_byte: json!([-1, -1]),
            end_byte: json!([-1, -1]),
            text: json!(["founded", "Jane Doe"]),
        };
        let answer = select_answer(&example(Annotations {
            short_answers: vec![candidate],
            ..Default::default()
        }))
        .unwrap();

        assert!(answer.remove_it);
    }

    #[test]
    fn test_zero_length_span_marked_ambiguous() {
        let answer = select_answer(&example(Annotations {
            short_answers: vec![AnswerCandidate::short_span(4, 4, "")],
            ..Default::default()
        }))
        .unwrap();

        assert!(answer.remove_it);
        assert!(answer.start_token <= answer.end_token);
    }

    #[test]
    fn test_scalar_short_field_is_malformed() {
        let mut candidate = AnswerCandidate::short_span(7, 9, "Jane Doe");
        candidate.start_byte = json!(30);
        let err = select_answer(&example(Annotations {
            short_answers: vec![candidate],
            ..Default::default()
        }))
        .unwrap_err();

        match err {
            PrepareError::MalformedAnnotation { id, field, .. } => {
                assert_eq!(id, "ex-1");
                assert_eq!(field, "start_byte");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_span_past_document_end_is_malformed() {
        let err = select_answer(&example(Annotations {
            short_answers: vec![AnswerCandidate::short_span(7, 42, "Jane Doe")],
            ..Default::default()
        }))
        .unwrap_err();
        assert!(matches!(err, PrepareError::MalformedAnnotation { .. }));
    }
}
