use tracing::warn;

use crate::answer::{CanonicalAnswer, IGNORE_INDEX};
use crate::category::Category;
use crate::config::AlignmentMode;
use crate::error::PrepareError;
use crate::tokenizer::SubwordTokenizer;
use crate::window::{TokenizedInput, Window};

/// Inclusive answer span in full-input sub-token coordinates (question prefix included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubTokenSpan {
    pub start: usize,
    pub end: usize,
}

/// A window with its answer expressed in window-local coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledWindow {
    pub input_ids: Vec<u32>,
    pub start_token: i64,
    pub end_token: i64,
    pub category: Category,
}

impl LabeledWindow {
    fn unanswered(window: Window, category: Category) -> Self {
        Self {
            input_ids: window.input_ids,
            start_token: IGNORE_INDEX,
            end_token: IGNORE_INDEX,
            category,
        }
    }
}

/// Collapse whitespace runs so decoded text compares against document text.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct SpanRemapper<'a> {
    tokenizer: &'a dyn SubwordTokenizer,
    mode: AlignmentMode,
}

impl<'a> SpanRemapper<'a> {
    pub fn new(tokenizer: &'a dyn SubwordTokenizer, mode: AlignmentMode) -> Self {
        Self { tokenizer, mode }
    }

    /// Convert a word-level answer span into sub-token indices of the full input.
    ///
    /// `words` is the markup-free document `input` was built from. Word counts
    /// come from encoding prefixes on their own, so a tokenizer that encodes a
    /// word differently in running text can push the span past the document;
    /// that is reported as `SpanOutOfRange`.
    pub fn locate(
        &self,
        id: &str,
        answer: &CanonicalAnswer,
        words: &[&str],
        input: &TokenizedInput,
    ) -> Result<SubTokenSpan, PrepareError> {
        let start_word = answer.start_token as usize;
        let end_word = answer.end_token as usize;
        if answer.start_token < 0 || start_word > end_word || end_word >= words.len() {
            return Err(PrepareError::MalformedAnnotation {
                id: id.to_string(),
                field: "end_token",
                reason: format!(
                    "word span [{start_word}, {end_word}] outside {} document words",
                    words.len()
                ),
            });
        }

        let start = self.prefix_len(id, &words[..start_word])?;
        let mut end = self.prefix_len(id, &words[..end_word])?;

        // The last answer word may tokenize into several sub-tokens
        let pieces = self
            .tokenizer
            .encode(words[end_word])
            .map_err(|e| PrepareError::tokenizer(id, e))?
            .len();
        if pieces > 1 {
            end += pieces - 1;
        }

        let span = SubTokenSpan {
            start: start + input.q_len,
            end: end + input.q_len,
        };
        if span.end >= input.context_end() {
            return Err(PrepareError::SpanOutOfRange {
                id: id.to_string(),
                end: span.end,
                context_end: input.context_end(),
            });
        }
        Ok(span)
    }

    fn prefix_len(&self, id: &str, words: &[&str]) -> Result<usize, PrepareError> {
        self.tokenizer
            .encode(&words.join(" "))
            .map(|ids| ids.len())
            .map_err(|e| PrepareError::tokenizer(id, e))
    }

    /// Label every window of one example.
    ///
    /// `span` is required for short/long answers; `expected_text` is what the
    /// decoded span must read as.
    pub fn label_windows(
        &self,
        id: &str,
        category: Category,
        span: Option<SubTokenSpan>,
        expected_text: &str,
        q_len: usize,
        windows: Vec<Window>,
    ) -> Result<Vec<LabeledWindow>, PrepareError> {
        windows
            .into_iter()
            .map(|window| match (category, span) {
                (Category::Short | Category::Long, Some(span)) => {
                    self.label_span_window(id, category, span, expected_text, q_len, window)
                }
                (Category::Short | Category::Long, None) | (Category::Null, _) => {
                    Ok(LabeledWindow::unanswered(window, Category::Null))
                }
                (Category::Yes | Category::No, _) => {
                    Ok(LabeledWindow::unanswered(window, category))
                }
            })
            .collect()
    }

    fn label_span_window(
        &self,
        id: &str,
        category: Category,
        span: SubTokenSpan,
        expected_text: &str,
        q_len: usize,
        window: Window,
    ) -> Result<LabeledWindow, PrepareError> {
        let contained = span.start >= window.window_start && span.end < window.window_end;
        if !contained {
            return Ok(LabeledWindow::unanswered(window, Category::Null));
        }

        let local_start = span.start - window.window_start + q_len;
        let local_end = span.end - window.window_start + q_len;
        self.verify(id, &window.input_ids[local_start..=local_end], expected_text)?;

        Ok(LabeledWindow {
            input_ids: window.input_ids,
            start_token: local_start as i64,
            end_token: local_end as i64,
            category,
        })
    }

    /// Decode the window-local span and compare it with the canonical text.
    fn verify(&self, id: &str, span_ids: &[u32], expected: &str) -> Result<(), PrepareError> {
        if expected.is_empty() {
            return Ok(());
        }

        let decoded = self
            .tokenizer
            .decode(span_ids)
            .map_err(|e| PrepareError::tokenizer(id, e))?;
        let decoded = normalize_whitespace(&decoded);
        let expected = normalize_whitespace(expected);
        if decoded == expected {
            return Ok(());
        }

        match self.mode {
            AlignmentMode::Lenient => {
                warn!(
                    example_id = %id,
                    expected = %expected,
                    decoded = %decoded,
                    "Span alignment mismatch"
                );
                Ok(())
            }
            AlignmentMode::Strict => Err(PrepareError::SpanAlignment {
                id: id.to_string(),
                expected,
                decoded,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::testing::{PieceTokenizer, SEP, StandaloneSplitTokenizer};
    use crate::window::DocumentWindower;

    const QUESTION: &str = "who wrote it";

    fn short_answer(start: i64, end: i64, text: &str) -> CanonicalAnswer {
        CanonicalAnswer {
            category: Category::Short,
            start_token: start,
            end_token: end,
            span_text: text.to_string(),
            remove_it: false,
        }
    }

    #[test]
    fn test_locate_extends_over_multi_piece_word() {
        let tok = PieceTokenizer::new();
        let remapper = SpanRemapper::new(&tok, AlignmentMode::Strict);
        let words = vec!["the", "treaty", "was", "international"];
        let input = TokenizedInput::build(&tok, "who wrote", &words.join(" ")).unwrap();
        let answer = short_answer(2, 3, "was international");

        let span = remapper.locate("ex", &answer, &words, &input).unwrap();

        // [CLS] who wrot ##e [SEP], then "the" = 1 piece, "treaty" = 2, "was" = 1,
        // "international" = 4
        assert_eq!(input.q_len, 5);
        assert_eq!(span, SubTokenSpan { start: 8, end: 12 });
    }

    #[test]
    fn test_span_rebased_into_containing_window() {
        let tok = PieceTokenizer::new();
        let remapper = SpanRemapper::new(&tok, AlignmentMode::Strict);
        let words: Vec<&str> = "a b c d e f g h i j k l m n o p".split(' ').collect();
        let context = words.join(" ");
        let input = TokenizedInput::build(&tok, QUESTION, &context).unwrap();
        let answer = short_answer(9, 10, "j k");

        let span = remapper.locate("ex", &answer, &words, &input).unwrap();
        let windows = DocumentWindower::new(12, 8, SEP)
            .unwrap()
            .split("ex", &input)
            .unwrap();
        let labeled = remapper
            .label_windows(
                "ex",
                Category::Short,
                Some(span),
                &answer.span_text,
                input.q_len,
                windows,
            )
            .unwrap();

        let mut found = 0;
        for window in &labeled {
            assert!(window.input_ids.len() <= 12);
            match window.category {
                Category::Short => {
                    found += 1;
                    let (s, e) = (window.start_token as usize, window.end_token as usize);
                    assert!(s <= e);
                    assert_eq!(tok.decode(&window.input_ids[s..=e]).unwrap(), "j k");
                }
                Category::Null => {
                    let span = (window.start_token, window.end_token);
                    assert_eq!(span, (IGNORE_INDEX, IGNORE_INDEX));
                }
                other => panic!("unexpected category {other}"),
            }
        }
        assert_eq!(found, 1);
        assert!(labeled.iter().any(|w| w.category == Category::Null));
    }

    #[test]
    fn test_every_containing_window_keeps_the_answer() {
        let tok = PieceTokenizer::new();
        let remapper = SpanRemapper::new(&tok, AlignmentMode::Strict);
        let words: Vec<&str> = "a b c d e f g h i j k l".split(' ').collect();
        let input = TokenizedInput::build(&tok, "q", &words.join(" ")).unwrap();
        // Question prefix is 3 tokens, content 7, step 3: "f" falls inside the first two windows
        let answer = short_answer(5, 5, "f");

        let span = remapper.locate("ex", &answer, &words, &input).unwrap();
        let windows = DocumentWindower::new(10, 7, SEP).unwrap().split("ex", &input).unwrap();
        let labeled = remapper
            .label_windows("ex", Category::Short, Some(span), "f", input.q_len, windows)
            .unwrap();

        let hits: Vec<&LabeledWindow> =
            labeled.iter().filter(|w| w.category == Category::Short).collect();
        assert_eq!(hits.len(), 2);
        for window in hits {
            let s = window.start_token as usize;
            assert_eq!(window.input_ids[s], input.input_ids[span.start]);
        }
    }

    #[test]
    fn test_yes_windows_all_carry_category() {
        let tok = PieceTokenizer::new();
        let remapper = SpanRemapper::new(&tok, AlignmentMode::Strict);
        let context = "word ".repeat(40);
        let input = TokenizedInput::build(&tok, QUESTION, &context).unwrap();
        let windows = DocumentWindower::new(12, 6, SEP).unwrap().split("ex", &input).unwrap();
        assert!(windows.len() > 1);

        let labeled = remapper
            .label_windows("ex", Category::Yes, None, "<cls>", input.q_len, windows)
            .unwrap();

        for window in labeled {
            assert_eq!(window.category, Category::Yes);
            assert_eq!(window.category.code(), 3);
            assert_eq!((window.start_token, window.end_token), (IGNORE_INDEX, IGNORE_INDEX));
        }
    }

    #[test]
    fn test_strict_mode_rejects_mismatch() {
        let tok = PieceTokenizer::new();
        let words = vec!["alpha", "beta"];
        let input = TokenizedInput::build(&tok, "q", &words.join(" ")).unwrap();
        let answer = short_answer(1, 1, "gamma");
        let windows = DocumentWindower::new(64, 32, SEP).unwrap().split("ex", &input).unwrap();

        let strict = SpanRemapper::new(&tok, AlignmentMode::Strict);
        let span = strict.locate("ex", &answer, &words, &input).unwrap();
        let err = strict
            .label_windows("ex", Category::Short, Some(span), "gamma", input.q_len, windows.clone())
            .unwrap_err();
        assert!(matches!(err, PrepareError::SpanAlignment { .. }));

        let lenient = SpanRemapper::new(&tok, AlignmentMode::Lenient);
        let labeled = lenient
            .label_windows("ex", Category::Short, Some(span), "gamma", input.q_len, windows)
            .unwrap();
        assert_eq!(labeled[0].category, Category::Short);
    }

    #[test]
    fn test_span_past_document_end_rejected() {
        // Alone, "tail" encodes as four pieces; inside the context it is one
        let tok = StandaloneSplitTokenizer::new("tail");
        let remapper = SpanRemapper::new(&tok, AlignmentMode::Lenient);
        let words = vec!["a", "b", "c", "d", "e", "f", "tail"];
        let input = TokenizedInput::build(&tok, "q", &words.join(" ")).unwrap();

        let err = remapper
            .locate("ex", &short_answer(6, 6, "tail"), &words, &input)
            .unwrap_err();
        let PrepareError::SpanOutOfRange { end, context_end, .. } = err else {
            panic!("expected out-of-range span, got {err:?}");
        };
        assert_eq!((end, context_end), (12, 10));

        // Windows over the same input never slice past their ids
        let span = remapper
            .locate("ex", &short_answer(5, 5, "f"), &words, &input)
            .unwrap();
        let windows = DocumentWindower::new(8, 4, SEP).unwrap().split("ex", &input).unwrap();
        assert!(windows.iter().all(|w| w.window_end <= input.input_ids.len()));
        let labeled = remapper
            .label_windows("ex", Category::Short, Some(span), "f", input.q_len, windows)
            .unwrap();
        assert!(labeled.iter().any(|w| w.category == Category::Short));
    }
}
