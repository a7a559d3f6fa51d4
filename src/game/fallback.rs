use lazy_static::lazy_static;

use crate::game::state::{Question, QuestionKind, QuestionMetadata, ToleranceKind};

lazy_static! {
    /// Built-in question set used when the configured pool yields
    /// nothing usable. Negative ids mark these as engine-local.
    static ref FALLBACK_QUESTIONS: Vec<Question> = build_fallback_questions();
}

/// Returns a fresh copy of the built-in fallback question set.
pub fn fallback_questions() -> Vec<Question> {
    FALLBACK_QUESTIONS.clone()
}

fn choice(
    id: i64,
    prompt: &str,
    options: &[&str],
    correct: &str,
    hint: Option<&str>,
) -> Question {
    Question {
        id,
        prompt: prompt.to_string(),
        options: options.iter().map(|s| s.to_string()).collect(),
        correct_answer: correct.to_string(),
        kind: QuestionKind::MultipleChoice,
        hint: hint.map(|s| s.to_string()),
        metadata: None,
        category: Some("Allgemeinwissen".to_string()),
        difficulty: Some("easy".to_string()),
        set_id: None,
    }
}

fn build_fallback_questions() -> Vec<Question> {
    vec![
        choice(
            -1,
            "Wie viele Bundesländer hat Deutschland?",
            &["14", "15", "16", "17"],
            "16",
            None,
        ),
        choice(
            -2,
            "Welche Stadt ist die Hauptstadt von Deutschland?",
            &["München", "Hamburg", "Berlin", "Frankfurt"],
            "Berlin",
            None,
        ),
        choice(
            -3,
            "Welcher Fluss fließt durch Köln?",
            &["Elbe", "Rhein", "Donau", "Main"],
            "Rhein",
            None,
        ),
        Question {
            id: -4,
            prompt: "Die Zugspitze ist der höchste Berg Deutschlands.".to_string(),
            options: vec!["wahr".to_string(), "falsch".to_string()],
            correct_answer: "wahr".to_string(),
            kind: QuestionKind::TrueFalse,
            hint: None,
            metadata: None,
            category: Some("Geographie".to_string()),
            difficulty: Some("easy".to_string()),
            set_id: None,
        },
        choice(
            -5,
            "Wer komponierte die 9. Sinfonie mit der \"Ode an die Freude\"?",
            &["Bach", "Beethoven", "Brahms", "Mozart"],
            "Beethoven",
            Some("Er wurde in Bonn geboren."),
        ),
        Question {
            id: -6,
            prompt: "In welchem Jahr fiel die Berliner Mauer?".to_string(),
            options: vec![],
            correct_answer: "1989".to_string(),
            kind: QuestionKind::FreeText,
            hint: Some("Im November desselben Jahres.".to_string()),
            metadata: None,
            category: Some("Geschichte".to_string()),
            difficulty: Some("easy".to_string()),
            set_id: None,
        },
        choice(
            -7,
            "Welches Bundesland ist flächenmäßig am größten?",
            &["Bayern", "Niedersachsen", "Hessen", "Sachsen"],
            "Bayern",
            None,
        ),
        Question {
            id: -8,
            prompt: "Schätze: Wie lang ist der Rhein in Kilometern?".to_string(),
            options: vec![],
            correct_answer: "1233".to_string(),
            kind: QuestionKind::Estimation,
            hint: None,
            metadata: Some(QuestionMetadata {
                correct_value: Some(1233.0),
                tolerance: Some(15.0),
                tolerance_type: Some(ToleranceKind::Percentage),
                ..Default::default()
            }),
            category: Some("Geographie".to_string()),
            difficulty: Some("medium".to_string()),
            set_id: None,
        },
        choice(
            -9,
            "Welche Farben hat die deutsche Flagge von oben nach unten?",
            &[
                "Schwarz, Rot, Gold",
                "Rot, Schwarz, Gold",
                "Gold, Rot, Schwarz",
            ],
            "Schwarz, Rot, Gold",
            None,
        ),
        choice(
            -10,
            "Welches Tier ist das Wappentier Deutschlands?",
            &["Löwe", "Adler", "Bär", "Stier"],
            "Adler",
            None,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_set_has_ten_questions_with_negative_ids() {
        let questions = fallback_questions();
        assert_eq!(questions.len(), 10);
        assert!(questions.iter().all(|q| q.id < 0));
    }

    #[test]
    fn fallback_ids_are_unique() {
        let mut ids: Vec<i64> = fallback_questions().iter().map(|q| q.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }
}
