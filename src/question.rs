//! Question Set and Decrypted Views
//!
//! The questionnaire is a fixed, statically known set of three numeric
//! questions. Handles are populated only by the refresh operation and
//! decrypted values only by the decrypt operation; a changed handle
//! invalidates any previously cached cleartext for that question.

use serde::Serialize;

use crate::error::{SurveyError, SurveyResult};
use crate::handle::Handle;

/// Static definition of one question
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuestionSpec {
    /// Ordinal accepted by the contract
    pub ordinal: u8,
    /// Stable key used in the decrypted summary
    pub key: &'static str,
    /// Display text
    pub text: &'static str,
}

/// The tracked question set, in contract ordinal order
pub const QUESTIONS: [QuestionSpec; 3] = [
    QuestionSpec {
        ordinal: 0,
        key: "bankPassword",
        text: "What is your bank password?",
    },
    QuestionSpec {
        ordinal: 1,
        key: "idNumber",
        text: "What is your ID number?",
    },
    QuestionSpec {
        ordinal: 2,
        key: "age",
        text: "How old are you?",
    },
];

/// Number of tracked questions
pub const QUESTION_COUNT: usize = QUESTIONS.len();

/// Live state of one question as exposed to the presentation layer
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionState {
    pub ordinal: u8,
    pub key: &'static str,
    pub text: &'static str,
    /// Ledger-reported handle, [`Handle::UNSET`] when unanswered
    pub handle: Handle,
    /// Cleartext from the last decryption round, if still valid
    pub decrypted: Option<u64>,
}

impl QuestionState {
    fn initial(spec: &QuestionSpec) -> Self {
        Self {
            ordinal: spec.ordinal,
            key: spec.key,
            text: spec.text,
            handle: Handle::UNSET,
            decrypted: None,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.handle.is_set()
    }
}

/// Fresh question state for all tracked questions
pub fn initial_questions() -> [QuestionState; QUESTION_COUNT] {
    [
        QuestionState::initial(&QUESTIONS[0]),
        QuestionState::initial(&QUESTIONS[1]),
        QuestionState::initial(&QUESTIONS[2]),
    ]
}

/// Derived, non-authoritative view over all three cleartexts.
///
/// Rebuilt wholesale on every successful decrypt, never patched field by
/// field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedSummary {
    pub id_number: u64,
    pub bank_password: u64,
    pub age: u64,
}

impl DecryptedSummary {
    /// Build from fully decrypted question state; every question must carry
    /// a cleartext or the summary cannot exist.
    pub fn from_questions(questions: &[QuestionState; QUESTION_COUNT]) -> SurveyResult<Self> {
        let value = |key: &str| {
            questions
                .iter()
                .find(|q| q.key == key)
                .and_then(|q| q.decrypted)
                .ok_or_else(|| SurveyError::malformed(format!("missing cleartext for {key}")))
        };
        Ok(Self {
            id_number: value("idNumber")?,
            bank_password: value("bankPassword")?,
            age: value("age")?,
        })
    }
}

/// Validate a raw numeric answer before any cryptographic or network work.
///
/// Accepts whole numbers in the unsigned 32-bit range only.
pub fn validate_answer(value: f64) -> SurveyResult<u32> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(SurveyError::validation(
            "answers must be whole numbers".to_string(),
        ));
    }
    if value < 0.0 || value > u32::MAX as f64 {
        return Err(SurveyError::validation(format!(
            "answers must be between 0 and {}",
            u32::MAX
        )));
    }
    Ok(value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_match_positions() {
        for (i, q) in QUESTIONS.iter().enumerate() {
            assert_eq!(q.ordinal as usize, i);
        }
    }

    #[test]
    fn test_initial_questions_unanswered() {
        for q in initial_questions() {
            assert!(!q.is_answered());
            assert_eq!(q.decrypted, None);
        }
    }

    #[test]
    fn test_validate_answer_boundaries() {
        assert_eq!(validate_answer(0.0).unwrap(), 0);
        assert_eq!(validate_answer(4_294_967_295.0).unwrap(), u32::MAX);
        assert!(validate_answer(4_294_967_296.0).is_err());
        assert!(validate_answer(-1.0).is_err());
        assert!(validate_answer(1.5).is_err());
        assert!(validate_answer(f64::NAN).is_err());
        assert!(validate_answer(f64::INFINITY).is_err());
    }

    #[test]
    fn test_summary_requires_all_cleartexts() {
        let mut questions = initial_questions();
        assert!(DecryptedSummary::from_questions(&questions).is_err());

        questions[0].decrypted = Some(1);
        questions[1].decrypted = Some(1234);
        questions[2].decrypted = Some(30);
        let summary = DecryptedSummary::from_questions(&questions).unwrap();
        assert_eq!(summary.bank_password, 1);
        assert_eq!(summary.id_number, 1234);
        assert_eq!(summary.age, 30);
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let summary = DecryptedSummary {
            id_number: 1234,
            bank_password: 1,
            age: 30,
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert_eq!(json, r#"{"idNumber":1234,"bankPassword":1,"age":30}"#);
    }
}
