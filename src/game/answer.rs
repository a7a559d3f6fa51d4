use crate::game::state::{MatchPair, Question, QuestionKind, ToleranceKind};

/// The checker's verdict for one submitted answer string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnswerCheck {
    pub is_correct: bool,
    /// Credit ratio in [0, 1]; only estimation, ordering and matching
    /// produce values strictly between the bounds.
    pub partial_score: f64,
}

impl AnswerCheck {
    fn wrong() -> AnswerCheck {
        AnswerCheck {
            is_correct: false,
            partial_score: 0.0,
        }
    }

    fn graded(partial: f64) -> AnswerCheck {
        let partial = partial.clamp(0.0, 1.0);
        AnswerCheck {
            is_correct: partial > 0.0,
            partial_score: partial,
        }
    }

    fn exact(matched: bool) -> AnswerCheck {
        AnswerCheck {
            is_correct: matched,
            partial_score: if matched { 1.0 } else { 0.0 },
        }
    }
}

/// Type-aware correctness check. Pure; parse failures never raise and
/// grade as `(false, 0)`.
pub fn check(answer: &str, question: &Question) -> AnswerCheck {
    match question.kind {
        QuestionKind::MultipleChoice | QuestionKind::TrueFalse => {
            AnswerCheck::exact(answer == question.correct_answer)
        }
        QuestionKind::FreeText | QuestionKind::FillInBlank => AnswerCheck::exact(
            answer.trim().to_lowercase() == question.correct_answer.trim().to_lowercase(),
        ),
        QuestionKind::Estimation => check_estimation(answer, question),
        QuestionKind::Ordering => check_ordering(answer, question),
        QuestionKind::Matching => check_matching(answer, question),
    }
}

fn check_estimation(answer: &str, question: &Question) -> AnswerCheck {
    let meta = match question.metadata.as_ref() {
        Some(m) => m,
        None => return AnswerCheck::exact(answer == question.correct_answer),
    };
    let (correct_value, tolerance, tolerance_type) =
        match (meta.correct_value, meta.tolerance, meta.tolerance_type) {
            (Some(v), Some(t), Some(ty)) => (v, t, ty),
            _ => return AnswerCheck::exact(answer == question.correct_answer),
        };

    let value = match parse_number(answer) {
        Some(v) => v,
        None => return AnswerCheck::wrong(),
    };

    let effective_tolerance = match tolerance_type {
        ToleranceKind::Percentage => correct_value.abs() * tolerance / 100.0,
        ToleranceKind::Absolute => tolerance,
    };

    let distance = (value - correct_value).abs();
    if effective_tolerance <= 0.0 {
        return AnswerCheck::exact(distance == 0.0);
    }

    AnswerCheck::graded((1.0 - distance / effective_tolerance).max(0.0))
}

fn check_ordering(answer: &str, question: &Question) -> AnswerCheck {
    let correct_order = match question
        .metadata
        .as_ref()
        .and_then(|m| m.correct_order.as_ref())
        .filter(|order| !order.is_empty())
    {
        Some(order) => order,
        None => return AnswerCheck::exact(answer == question.correct_answer),
    };

    let submitted = match parse_int_sequence(answer) {
        Some(seq) => seq,
        None => return AnswerCheck::wrong(),
    };
    if submitted.len() != correct_order.len() {
        return AnswerCheck::wrong();
    }

    let matches = submitted
        .iter()
        .zip(correct_order.iter())
        .filter(|(a, b)| a == b)
        .count();
    AnswerCheck::graded(matches as f64 / correct_order.len() as f64)
}

fn check_matching(answer: &str, question: &Question) -> AnswerCheck {
    let correct_pairs = match question
        .metadata
        .as_ref()
        .and_then(|m| m.pairs.as_ref())
        .filter(|pairs| !pairs.is_empty())
    {
        Some(pairs) => pairs,
        None => return AnswerCheck::exact(answer == question.correct_answer),
    };

    let submitted: Vec<MatchPair> = match serde_json::from_str(answer) {
        Ok(pairs) => pairs,
        Err(_) => return AnswerCheck::wrong(),
    };

    let matches = submitted
        .iter()
        .filter(|pair| correct_pairs.contains(pair))
        .count();
    AnswerCheck::graded(matches as f64 / correct_pairs.len() as f64)
}

/// Parses a decimal number, accepting a comma as decimal separator.
fn parse_number(answer: &str) -> Option<f64> {
    let trimmed = answer.trim();
    trimmed
        .parse::<f64>()
        .or_else(|_| trimmed.replace(',', ".").parse::<f64>())
        .ok()
        .filter(|v| v.is_finite())
}

/// Parses a sequence of integers from either a JSON array or a
/// comma/whitespace-separated list.
fn parse_int_sequence(answer: &str) -> Option<Vec<i64>> {
    if let Ok(seq) = serde_json::from_str::<Vec<i64>>(answer.trim()) {
        return Some(seq);
    }
    let parts: Vec<&str> = answer
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        return None;
    }
    parts.iter().map(|p| p.parse::<i64>().ok()).collect()
}
