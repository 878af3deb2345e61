use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::normalize::normalize_answer;

const SPECIAL_ANSWERS: [&str; 3] = ["yes", "no", "noanswer"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct F1Score {
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
}

impl F1Score {
    pub fn is_perfect(&self) -> bool {
        self.f1 == 1.0 && self.precision == 1.0 && self.recall == 1.0
    }
}

/// Token-overlap F1 between normalized answers.
///
/// A yes/no/noanswer on either side scores zero unless both sides agree exactly.
pub fn f1_score(prediction: &str, ground_truth: &str) -> F1Score {
    let prediction = normalize_answer(prediction);
    let ground_truth = normalize_answer(ground_truth);

    let special = |s: &str| SPECIAL_ANSWERS.contains(&s);
    if (special(&prediction) || special(&ground_truth)) && prediction != ground_truth {
        return F1Score::default();
    }

    let predicted: Vec<&str> = prediction.split_whitespace().collect();
    let truth: Vec<&str> = ground_truth.split_whitespace().collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for &token in &truth {
        *counts.entry(token).or_insert(0) += 1;
    }
    let mut same = 0;
    for &token in &predicted {
        if let Some(count) = counts.get_mut(token) {
            if *count > 0 {
                *count -= 1;
                same += 1;
            }
        }
    }

    if same == 0 {
        return F1Score::default();
    }

    let precision = same as f64 / predicted.len() as f64;
    let recall = same as f64 / truth.len() as f64;
    F1Score {
        f1: 2.0 * precision * recall / (precision + recall),
        precision,
        recall,
    }
}

pub fn exact_match(prediction: &str, ground_truth: &str) -> bool {
    normalize_answer(prediction) == normalize_answer(ground_truth)
}
