use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four exclusion flags a user picks before a check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportOptions {
    pub exclude_bibliography: bool,
    pub exclude_quotes: bool,
    pub exclude_citations: bool,
    pub exclude_small_matches: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsParseError {
    #[error("expected 4 answers, got {0}")]
    WrongCount(usize),
    #[error("answer {position} is not yes or no: {token:?}")]
    InvalidToken { position: usize, token: String },
}

const QUESTIONS: [&str; 4] = [
    "Exclude bibliography?",
    "Exclude quoted material?",
    "Exclude cited material?",
    "Exclude small matches?",
];

/// Format a reply must follow
pub const FORMAT_HINT: &str = "Yes, No, Yes, Yes";

impl ReportOptions {
    /// Parses a reply of exactly four comma-separated `yes`/`no` answers (any case).
    pub fn parse(text: &str) -> Result<Self, OptionsParseError> {
        let tokens: Vec<&str> = text.split(',').map(str::trim).collect();
        if tokens.len() != 4 {
            return Err(OptionsParseError::WrongCount(tokens.len()));
        }

        let mut answers = [false; 4];
        for (i, token) in tokens.iter().enumerate() {
            answers[i] = match token.to_ascii_lowercase().as_str() {
                "yes" => true,
                "no" => false,
                _ => {
                    return Err(OptionsParseError::InvalidToken {
                        position: i + 1,
                        token: token.to_string(),
                    })
                }
            };
        }

        Ok(Self {
            exclude_bibliography: answers[0],
            exclude_quotes: answers[1],
            exclude_citations: answers[2],
            exclude_small_matches: answers[3],
        })
    }

    /// The four questions, numbered, followed by the reply format
    pub fn prompt() -> String {
        let mut text = String::from("Choose your report options:\n");
        for (i, question) in QUESTIONS.iter().enumerate() {
            text.push_str(&format!("{}. {}\n", i + 1, question));
        }
        text.push_str(&format!("\nReply in this format: {}", FORMAT_HINT));
        text
    }

    pub fn as_array(&self) -> [bool; 4] {
        [
            self.exclude_bibliography,
            self.exclude_quotes,
            self.exclude_citations,
            self.exclude_small_matches,
        ]
    }

    /// Human-readable summary used in reports
    pub fn summary(&self) -> Vec<(&'static str, bool)> {
        QUESTIONS.iter().copied().zip(self.as_array()).collect()
    }

    pub fn excluded_count(&self) -> u8 {
        self.as_array().iter().filter(|flag| **flag).count() as u8
    }
}
