//! SMTP replies and the standard reply codes used by the engine.

use std::fmt;

/// Numeric SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResponseCode(u16);

impl ResponseCode {
    pub const SYSTEM_STATUS: Self = Self(211);
    pub const HELP_MESSAGE: Self = Self(214);
    pub const SERVICE_READY: Self = Self(220);
    pub const CLOSING_TRANSMISSION_CHANNEL: Self = Self(221);
    pub const AUTHENTICATION_OK: Self = Self(235);
    pub const OK: Self = Self(250);
    pub const USER_NOT_LOCAL_WILL_FORWARD: Self = Self(251);
    pub const CANNOT_VERIFY_USER: Self = Self(252);
    pub const AUTHENTICATION_CONTINUE: Self = Self(334);
    pub const START_MAIL_INPUT: Self = Self(354);
    pub const SERVICE_NOT_AVAILABLE: Self = Self(421);
    pub const MAILBOX_UNAVAILABLE: Self = Self(450);
    pub const LOCAL_ERROR_IN_PROCESSING: Self = Self(451);
    pub const INSUFFICIENT_STORAGE: Self = Self(452);
    pub const TEMPORARY_AUTHENTICATION_FAILURE: Self = Self(454);
    pub const SYNTAX_ERROR_COMMAND_UNRECOGNISED: Self = Self(500);
    pub const SYNTAX_ERROR_IN_PARAMETERS: Self = Self(501);
    pub const COMMAND_NOT_IMPLEMENTED: Self = Self(502);
    pub const BAD_SEQUENCE_OF_COMMANDS: Self = Self(503);
    pub const COMMAND_PARAMETER_NOT_IMPLEMENTED: Self = Self(504);
    pub const AUTHENTICATION_REQUIRED: Self = Self(530);
    pub const AUTHENTICATION_MECHANISM_TOO_WEAK: Self = Self(534);
    pub const AUTHENTICATION_FAILURE: Self = Self(535);
    pub const ENCRYPTION_REQUIRED: Self = Self(538);
    pub const RECIPIENT_REJECTED: Self = Self(550);
    pub const EXCEEDED_STORAGE_ALLOCATION: Self = Self(552);
    pub const MAILBOX_NAME_NOT_ALLOWED: Self = Self(553);
    pub const TRANSACTION_FAILED: Self = Self(554);

    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// A complete reply: one code and one or more message lines.
///
/// `Display` renders the wire form. Every line but the last is written as
/// `code-text`, the last as `code text`, and each line ends in CRLF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    code: ResponseCode,
    lines: Vec<String>,
}

impl SmtpResponse {
    /// Builds a response, splitting `message` into lines on LF (a preceding
    /// CR is dropped).
    pub fn new(code: ResponseCode, message: impl AsRef<str>) -> Self {
        let lines = message
            .as_ref()
            .split('\n')
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect();
        Self { code, lines }
    }

    /// Builds a multi-line response from already separated lines.
    pub fn multiline<I, S>(code: ResponseCode, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        if lines.is_empty() {
            lines.push(String::new());
        }
        Self { code, lines }
    }

    pub fn code(&self) -> ResponseCode {
        self.code
    }

    /// Message lines joined with LF.
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_success(&self) -> bool {
        self.code.0 < 400
    }

    pub fn is_error(&self) -> bool {
        self.code.0 >= 400
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);
        for (index, line) in self.lines.iter().enumerate() {
            let separator = if index == last { ' ' } else { '-' };
            write!(f, "{}{}{}\r\n", self.code, separator, line)?;
        }
        Ok(())
    }
}
