//! Document number formatting.
//!
//! Templates are literal text with `{...}` placeholders:
//! `{PREFIX}`, `{YYYY}`, `{YY}` and `{N...}` where the count of `N`s is the
//! zero-padding width of the sequence number. Exactly one sequence
//! placeholder is required. Numbers wider than the padding are printed in
//! full.

use serde::{Deserialize, Serialize};

use wareflow_core::{DomainError, DomainResult};

pub const DEFAULT_TEMPLATE: &str = "{PREFIX}-{YYYY}-{NNNN}";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Prefix,
    Year4,
    Year2,
    Sequence(usize),
}

/// A parsed number template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NumberTemplate {
    source: String,
    #[serde(skip)]
    tokens: Vec<Token>,
}

impl NumberTemplate {
    pub fn parse(template: &str) -> DomainResult<Self> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = template;
        let mut sequences = 0;

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                DomainError::validation(format!("unclosed placeholder in template '{template}'"))
            })?;
            let name = &after[..close];
            let token = match name {
                "PREFIX" => Token::Prefix,
                "YYYY" => Token::Year4,
                "YY" => Token::Year2,
                n if !n.is_empty() && n.chars().all(|c| c == 'N') => {
                    sequences += 1;
                    Token::Sequence(n.len())
                }
                other => {
                    return Err(DomainError::validation(format!(
                        "unknown placeholder '{{{other}}}' in template '{template}'"
                    )));
                }
            };
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(token);
            rest = &after[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        if sequences != 1 {
            return Err(DomainError::validation(format!(
                "template '{template}' must contain exactly one sequence placeholder"
            )));
        }

        Ok(Self {
            source: template.to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn format(&self, prefix: &str, year: i32, sequence: u64) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(s) => out.push_str(s),
                Token::Prefix => out.push_str(prefix),
                Token::Year4 => out.push_str(&format!("{year:04}")),
                Token::Year2 => out.push_str(&format!("{:02}", year.rem_euclid(100))),
                Token::Sequence(width) => out.push_str(&format!("{sequence:0width$}")),
            }
        }
        out
    }
}

impl Default for NumberTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_TEMPLATE.to_string(),
            tokens: vec![
                Token::Prefix,
                Token::Literal("-".to_string()),
                Token::Year4,
                Token::Literal("-".to_string()),
                Token::Sequence(4),
            ],
        }
    }
}

impl TryFrom<String> for NumberTemplate {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NumberTemplate> for String {
    fn from(value: NumberTemplate) -> Self {
        value.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template() {
        let t = NumberTemplate::default();
        assert_eq!(t, NumberTemplate::parse(DEFAULT_TEMPLATE).unwrap());
        assert_eq!(t.format("GRN", 2026, 7), "GRN-2026-0007");
    }

    #[test]
    fn short_year_and_wide_padding() {
        let t = NumberTemplate::parse("{PREFIX}/{YY}/{NNNNNN}").unwrap();
        assert_eq!(t.format("MIS", 2031, 42), "MIS/31/000042");
    }

    #[test]
    fn overflowing_sequence_is_not_truncated() {
        let t = NumberTemplate::parse("{PREFIX}{NN}").unwrap();
        assert_eq!(t.format("IT", 2026, 12345), "IT12345");
    }

    #[test]
    fn rejects_bad_templates() {
        assert!(NumberTemplate::parse("{PREFIX}-{YYYY}").is_err());
        assert!(NumberTemplate::parse("{PREFIX}-{NN}-{NNN}").is_err());
        assert!(NumberTemplate::parse("{PREFIX}-{DATE}-{NNN}").is_err());
        assert!(NumberTemplate::parse("{PREFIX-{NNN}").is_err());
    }

    #[test]
    fn serde_uses_template_string() {
        let t: NumberTemplate = serde_json::from_str("\"{PREFIX}{NNN}\"").unwrap();
        assert_eq!(t.format("DR", 2026, 3), "DR003");
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"{PREFIX}{NNN}\"");
    }
}
