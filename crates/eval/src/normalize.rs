use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[[:punct:]]").unwrap());
static ARTICLES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(a|an|the)\b").unwrap());

// Characters that separate words inside answer aliases
const ALIAS_SEPARATORS: &[char] = &['‘', '’', '´', '`', '.', ',', '-', '"', '_'];

/// Lowercase, strip punctuation, drop articles and collapse whitespace.
pub fn normalize_answer(text: &str) -> String {
    let lower = text.to_lowercase();
    let no_punct = PUNCTUATION.replace_all(&lower, "");
    let no_articles = ARTICLES.replace_all(&no_punct, " ");
    no_articles.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased, separator-free spellings under which an answer counts as matched.
///
/// With `sub_answers`, multi-word answers also match without their first or last word.
pub fn expand_to_aliases(answers: &[String], sub_answers: bool) -> BTreeSet<String> {
    let mut candidates: Vec<String> = answers.to_vec();

    if sub_answers {
        for answer in answers {
            let words: Vec<&str> = answer.split(' ').collect();
            if words.len() > 1 {
                candidates.push(words[1..].join(" "));
                candidates.push(words[..words.len() - 1].join(" "));
            }
        }
    }

    candidates
        .iter()
        .map(|answer| {
            let alias: String = answer
                .to_lowercase()
                .chars()
                .map(|c| if ALIAS_SEPARATORS.contains(&c) { ' ' } else { c })
                .collect();
            alias.split_whitespace().collect::<Vec<_>>().join(" ")
        })
        .collect()
}
