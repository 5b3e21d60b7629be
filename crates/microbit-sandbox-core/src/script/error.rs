//! Script error types.
//!
//! Every failure raised while lexing, parsing or executing a learner program is
//! a [`ScriptError`]. Its `Display` form is the diagnostic text handed back to
//! the host, e.g. `NameError: name 'foo' is not defined (line 3)`.

use std::fmt;

/// Category of a script failure, named after the learner-facing exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Name,
    Type,
    Value,
    ZeroDivision,
    Index,
    Attribute,
    Import,
    Overflow,
    Recursion,
    Runtime,
    /// Execution was stopped from outside the worker.
    Interrupted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Name => "NameError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Value => "ValueError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Attribute => "AttributeError",
            ErrorKind::Import => "ImportError",
            ErrorKind::Overflow => "OverflowError",
            ErrorKind::Recursion => "RecursionError",
            ErrorKind::Runtime => "RuntimeError",
            ErrorKind::Interrupted => "KeyboardInterrupt",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure raised by learner code.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    /// 1-based source line, when known.
    pub line: Option<usize>,
}

pub type ScriptResult<T> = Result<T, ScriptError>;

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self::new(ErrorKind::Syntax, message).at_line(line)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    /// Attach a line number unless one is already recorded.
    ///
    /// Errors bubble outwards through nested statements; the innermost line wins.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_format() {
        let err = ScriptError::new(ErrorKind::Name, "name 'x' is not defined").at_line(4);
        assert_eq!(err.to_string(), "NameError: name 'x' is not defined (line 4)");
    }

    #[test]
    fn test_innermost_line_wins() {
        let err = ScriptError::type_error("bad").at_line(7).at_line(2);
        assert_eq!(err.line, Some(7));
    }
}
