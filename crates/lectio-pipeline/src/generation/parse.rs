//! Question prompt building, output parsing and item heuristics.

use std::sync::LazyLock;

use lectio_core::models::{DifficultyLevel, QuestionType};
use regex::Regex;

/// Upper bound on requested and parsed questions.
pub const MAX_QUESTIONS: usize = 20;

const PROMPT_TEXT_LIMIT: usize = 1000;
const MIN_QUESTION_CHARS: usize = 10;
const LONG_QUESTION_CHARS: usize = 120;
const BASE_CONFIDENCE: f64 = 0.75;

/// A leading `12. ` style list number. `None` only if the pattern fails to compile.
static LIST_NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\d+\.\s*").ok());

/// Question generation prompt over at most the first 1000 characters of `text`.
pub fn build_prompt(text: &str, desired: u32) -> String {
    let count = (desired as usize).clamp(1, MAX_QUESTIONS);
    let excerpt = match text.char_indices().nth(PROMPT_TEXT_LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    };
    format!(
        "Generate {} questions based on the following text. Each question should be on a \
         new line starting with 'Q:':\n\nText: {}\n\nQuestions:",
        count, excerpt
    )
}

/// Splits raw model output on `Q:` markers into at most [`MAX_QUESTIONS`] questions.
pub fn parse_questions(raw: &str) -> Vec<String> {
    raw.split("Q:")
        .map(str::trim)
        .map(strip_numbering)
        .filter(|q| q.chars().count() > MIN_QUESTION_CHARS)
        .take(MAX_QUESTIONS)
        .map(str::to_string)
        .collect()
}

fn strip_numbering(question: &str) -> &str {
    match LIST_NUMBER.as_ref().and_then(|re| re.find(question)) {
        Some(number) => &question[number.end()..],
        None => question,
    }
}

fn starts_with_word(text: &str, word: &str) -> bool {
    text.strip_prefix(word)
        .is_some_and(|rest| !rest.starts_with(char::is_alphanumeric))
}

fn starts_with_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| starts_with_word(text, w))
}

/// Question type from the leading interrogative (English, Spanish, French).
pub fn classify_question(question: &str) -> QuestionType {
    let q = question
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();

    if q.contains("what do you think") || starts_with_any(&q, &["reflect", "evaluate"]) {
        QuestionType::Metacognitive
    } else if starts_with_any(&q, &["how", "cómo", "como", "comment"]) {
        QuestionType::Procedural
    } else if starts_with_any(&q, &["why", "por qué", "pourquoi"]) {
        QuestionType::Analytical
    } else if starts_with_any(
        &q,
        &[
            "explain", "describe", "compare", "explica", "describa", "compara", "expliquez",
            "décrivez", "comparez",
        ],
    ) {
        QuestionType::Conceptual
    } else {
        QuestionType::Factual
    }
}

/// Difficulty from question type, one level harder for long questions.
pub fn difficulty_for(question_type: QuestionType, question: &str) -> DifficultyLevel {
    let base = match question_type {
        QuestionType::Factual => DifficultyLevel::Easy,
        QuestionType::Procedural | QuestionType::Conceptual => DifficultyLevel::Medium,
        QuestionType::Analytical | QuestionType::Metacognitive => DifficultyLevel::Hard,
    };
    if question.chars().count() <= LONG_QUESTION_CHARS {
        return base;
    }
    match base {
        DifficultyLevel::Easy => DifficultyLevel::Medium,
        _ => DifficultyLevel::Hard,
    }
}

/// `0.75 + 0.25 * score` in `[0.75, 1.0]`; 0.75 without a score.
pub fn confidence_from_score(score: Option<f64>) -> f64 {
    match score.filter(|s| s.is_finite()) {
        Some(score) => (BASE_CONFIDENCE + 0.25 * score).clamp(BASE_CONFIDENCE, 1.0),
        None => BASE_CONFIDENCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_truncates_long_text() {
        let text = "a".repeat(1500);
        let prompt = build_prompt(&text, 5);
        assert!(prompt.starts_with("Generate 5 questions"));
        assert!(prompt.contains(&format!("Text: {}...\n", "a".repeat(1000))));
        assert!(!prompt.contains(&"a".repeat(1001)));
    }

    #[test]
    fn prompt_clamps_question_count() {
        assert!(build_prompt("text", 0).starts_with("Generate 1 questions"));
        assert!(build_prompt("text", 99).starts_with("Generate 20 questions"));
        assert!(build_prompt("short text", 3).contains("Text: short text\n"));
    }

    #[test]
    fn prompt_truncation_respects_char_boundaries() {
        let text = "é".repeat(1200);
        let prompt = build_prompt(&text, 5);
        assert!(prompt.contains(&format!("{}...", "é".repeat(1000))));
    }

    #[test]
    fn parses_numbered_questions() {
        let raw = "Q: 1. What is a cell?\nQ: 2. Why do cells divide?\nQ: Ok?\nQ:   ";
        assert_eq!(
            parse_questions(raw),
            vec!["What is a cell?", "Why do cells divide?"]
        );
    }

    #[test]
    fn keeps_leading_text_when_long_enough() {
        let raw = "Here are some questions Q: What is osmosis in plants?";
        assert_eq!(
            parse_questions(raw),
            vec!["Here are some questions", "What is osmosis in plants?"]
        );
    }

    #[test]
    fn caps_question_count() {
        let raw = (0..30)
            .map(|i| format!("Q: What is item number {}?", i))
            .collect::<String>();
        assert_eq!(parse_questions(&raw).len(), MAX_QUESTIONS);
    }

    #[test]
    fn numbering_without_dot_is_kept() {
        assert_eq!(strip_numbering("1984 was a novel"), "1984 was a novel");
        assert_eq!(strip_numbering("3.   What"), "What");
        assert_eq!(strip_numbering("12.5 grams"), "5 grams");
        assert!(LIST_NUMBER.is_some());
    }

    #[test]
    fn classifies_by_leading_word() {
        assert_eq!(classify_question("How does mitosis work?"), QuestionType::Procedural);
        assert_eq!(classify_question("However, what is ATP?"), QuestionType::Factual);
        assert_eq!(classify_question("Why is the sky blue?"), QuestionType::Analytical);
        assert_eq!(classify_question("¿Por qué llueve?"), QuestionType::Analytical);
        assert_eq!(classify_question("Pourquoi la mer est salée ?"), QuestionType::Analytical);
        assert_eq!(classify_question("Explain photosynthesis."), QuestionType::Conceptual);
        assert_eq!(
            classify_question("What do you think about this method?"),
            QuestionType::Metacognitive
        );
        assert_eq!(classify_question("Evaluate the argument."), QuestionType::Metacognitive);
        assert_eq!(classify_question("What is a cell?"), QuestionType::Factual);
    }

    #[test]
    fn long_questions_are_harder() {
        let short = "What is a cell?";
        let long = format!("What is {}?", "a very long clause ".repeat(10));
        assert_eq!(difficulty_for(QuestionType::Factual, short), DifficultyLevel::Easy);
        assert_eq!(difficulty_for(QuestionType::Factual, &long), DifficultyLevel::Medium);
        assert_eq!(difficulty_for(QuestionType::Conceptual, &long), DifficultyLevel::Hard);
        assert_eq!(difficulty_for(QuestionType::Analytical, short), DifficultyLevel::Hard);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(confidence_from_score(None), 0.75);
        assert_eq!(confidence_from_score(Some(1.0)), 1.0);
        assert!((confidence_from_score(Some(0.4)) - 0.85).abs() < 1e-9);
        assert_eq!(confidence_from_score(Some(-3.0)), 0.75);
        assert_eq!(confidence_from_score(Some(7.0)), 1.0);
        assert_eq!(confidence_from_score(Some(f64::NAN)), 0.75);
    }
}
