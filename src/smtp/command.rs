//! Parsing of SMTP command lines, their arguments and ESMTP parameters.

use std::fmt;

use super::error::SmtpServerError;
use super::response::ResponseCode;

/// One received command line split into verb and argument text.
///
/// The verb is the leading run of ASCII letters/digits, uppercased. It must
/// be followed by the end of the line or by a run of spaces, tabs or colons,
/// which is skipped; whatever remains is the argument text. Because the verb
/// stops at the first separator, `MAIL FROM:<a:b@c>` yields verb `MAIL` and
/// arguments `FROM:<a:b@c>`, and parsing those arguments again yields sub-verb
/// `FROM` with arguments `<a:b@c>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpCommand {
    text: String,
    verb: String,
    arguments: String,
    is_valid: bool,
}

impl SmtpCommand {
    pub fn parse(text: &str) -> Self {
        let verb_len = text
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(text.len());
        let (verb, rest) = text.split_at(verb_len);

        let separated = rest.is_empty() || rest.starts_with(is_separator);
        let is_valid = !verb.is_empty() && separated;

        let arguments = if is_valid {
            rest.trim_start_matches(is_separator).to_string()
        } else {
            String::new()
        };

        Self {
            text: text.to_string(),
            verb: if is_valid { verb.to_ascii_uppercase() } else { String::new() },
            arguments,
            is_valid,
        }
    }

    /// The uppercased verb, empty when the line is not valid.
    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn arguments(&self) -> &str {
        &self.arguments
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | ':')
}

/// Splits argument text on whitespace, keeping angle-bracket groups whole.
///
/// Whitespace only separates arguments outside `<...>`. Nested brackets are
/// balanced, so `<Display Name<addr@host>>` is a single argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentsParser {
    text: String,
    arguments: Vec<String>,
}

impl ArgumentsParser {
    pub fn new(text: &str) -> Self {
        let mut arguments = Vec::new();
        let mut current = String::new();
        let mut depth = 0usize;

        for c in text.chars() {
            match c {
                '<' => {
                    depth += 1;
                    current.push(c);
                }
                '>' => {
                    depth = depth.saturating_sub(1);
                    current.push(c);
                }
                c if c.is_whitespace() && depth == 0 => {
                    if !current.is_empty() {
                        arguments.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            }
        }
        if !current.is_empty() {
            arguments.push(current);
        }

        Self {
            text: text.to_string(),
            arguments,
        }
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_arguments(self) -> Vec<String> {
        self.arguments
    }
}

/// An ESMTP parameter. Keys compare case-insensitively.
///
/// Keyword-only parameters such as `SMTPUTF8` have no value.
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    value: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.value == other.value
    }
}

impl Eq for Parameter {}

/// Turns `KEY=VALUE` tokens into ordered [`Parameter`]s.
pub struct ParameterParser;

impl ParameterParser {
    /// Parses every token, preserving order.
    ///
    /// A token without `=` becomes a keyword-only parameter. A token with an
    /// empty key (`=x`) is malformed and rejected with a 501.
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<Parameter>, SmtpServerError> {
        tokens
            .iter()
            .map(|token| {
                let token = token.as_ref();
                let (name, value) = match token.split_once('=') {
                    Some((name, value)) => (name, Some(value.to_string())),
                    None => (token, None),
                };
                if name.is_empty() {
                    return Err(SmtpServerError::with(
                        ResponseCode::SYNTAX_ERROR_IN_PARAMETERS,
                        format!("Malformed parameter '{token}'"),
                    ));
                }
                Ok(Parameter::new(name, value))
            })
            .collect()
    }
}
