//! Tokenizer for the board scripting language.
//!
//! Produces a flat token stream with explicit `Newline`, `Indent` and `Dedent`
//! tokens so the parser never has to look at whitespace. Newlines inside
//! brackets are ignored, as are blank and comment-only lines.

use super::error::{ScriptError, ScriptResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

/// Longest operators first so `**=` wins over `**` and `*`.
const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "->", "(", ")",
    "[", "]", ",", ":", ".", "=", "+", "-", "*", "/", "%", "<", ">", ";",
];

const TAB_WIDTH: usize = 8;

pub fn tokenize(source: &str) -> ScriptResult<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            depth: 0,
            indents: vec![0],
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if let Some(ch) = c {
            self.pos += 1;
            if ch == '\n' {
                self.line += 1;
            }
        }
        c
    }

    fn push(&mut self, tok: Tok, line: usize) {
        self.tokens.push(Token { tok, line });
    }

    fn run(mut self) -> ScriptResult<Vec<Token>> {
        let mut at_line_start = true;
        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                if self.handle_indentation()? {
                    continue;
                }
                at_line_start = false;
            }
            let Some(c) = self.peek() else { break };
            match c {
                '\n' => {
                    let line = self.line;
                    self.advance();
                    if self.depth == 0 {
                        self.push(Tok::Newline, line);
                        at_line_start = true;
                    }
                }
                ' ' | '\t' | '\r' | '\x0c' => {
                    self.advance();
                }
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.advance();
                    self.advance();
                }
                '\\' if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.advance();
                    self.advance();
                    self.advance();
                }
                '"' | '\'' => {
                    let line = self.line;
                    let text = self.read_string(c)?;
                    self.push(Tok::Str(text), line);
                }
                c if c.is_ascii_digit() => self.read_number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.read_number()?,
                c if c.is_alphabetic() || c == '_' => {
                    let line = self.line;
                    let name = self.read_identifier();
                    if matches!(self.peek(), Some('"') | Some('\''))
                        && matches!(name.as_str(), "r" | "R" | "b" | "B" | "u" | "U")
                    {
                        let quote = self.peek().unwrap_or('"');
                        let text = self.read_raw_or_plain(quote, name.eq_ignore_ascii_case("r"))?;
                        self.push(Tok::Str(text), line);
                    } else {
                        self.push(Tok::Name(name), line);
                    }
                }
                _ => self.read_operator()?,
            }
        }

        let line = self.line;
        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline)
        ) {
            self.push(Tok::Newline, line);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent, line);
        }
        self.push(Tok::Eof, line);
        Ok(self.tokens)
    }

    /// Measure leading whitespace of a logical line and emit indent tokens.
    ///
    /// Returns `true` when the line was blank or comment-only and was consumed.
    fn handle_indentation(&mut self) -> ScriptResult<bool> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\x0c' | '\r' => {}
                _ => break,
            }
            self.advance();
        }
        match self.peek() {
            None => return Ok(true),
            Some('\n') => {
                self.advance();
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.advance();
                }
                return Ok(true);
            }
            _ => {}
        }

        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent, self.line);
        } else {
            while width < self.indents.last().copied().unwrap_or(0) {
                self.indents.pop();
                self.push(Tok::Dedent, self.line);
            }
            if width != self.indents.last().copied().unwrap_or(0) {
                return Err(ScriptError::syntax(
                    "unindent does not match any outer indentation level",
                    self.line,
                ));
            }
        }
        Ok(false)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        name
    }

    fn read_number(&mut self) -> ScriptResult<()> {
        let line = self.line;
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.advance();
            self.advance();
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() || c == '_' {
                    if c != '_' {
                        digits.push(c);
                    }
                    self.advance();
                } else {
                    break;
                }
            }
            let value = i64::from_str_radix(&digits, 16)
                .map_err(|_| ScriptError::syntax("invalid hexadecimal literal", line))?;
            self.push(Tok::Int(value), line);
            return Ok(());
        }

        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                self.advance();
            } else if c == '.' && !is_float {
                is_float = true;
                text.push(c);
                self.advance();
            } else if matches!(c, 'e' | 'E') {
                let next = self.peek_at(1);
                let signed = matches!(next, Some('+') | Some('-'))
                    && self.peek_at(2).is_some_and(|d| d.is_ascii_digit());
                if next.is_some_and(|d| d.is_ascii_digit()) || signed {
                    is_float = true;
                    text.push('e');
                    self.advance();
                    if signed {
                        if let Some(sign) = self.advance() {
                            text.push(sign);
                        }
                    }
                } else {
                    break;
                }
            } else {
                break;
            }
        }

        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| ScriptError::syntax(format!("invalid number '{}'", text), line))?;
            self.push(Tok::Float(value), line);
        } else {
            let value: i64 = text.parse().map_err(|_| {
                ScriptError::syntax(format!("integer literal '{}' is too large", text), line)
            })?;
            self.push(Tok::Int(value), line);
        }
        Ok(())
    }

    fn read_raw_or_plain(&mut self, quote: char, raw: bool) -> ScriptResult<String> {
        if raw {
            self.read_string_body(quote, false)
        } else {
            self.read_string(quote)
        }
    }

    fn read_string(&mut self, quote: char) -> ScriptResult<String> {
        self.read_string_body(quote, true)
    }

    fn read_string_body(&mut self, quote: char, escapes: bool) -> ScriptResult<String> {
        let start_line = self.line;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        let opener = if triple { 3 } else { 1 };
        for _ in 0..opener {
            self.advance();
        }

        let mut text = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(ScriptError::syntax(
                    "unterminated string literal",
                    start_line,
                ));
            };
            if c == quote {
                if !triple {
                    self.advance();
                    return Ok(text);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.advance();
                    self.advance();
                    self.advance();
                    return Ok(text);
                }
            }
            if c == '\n' && !triple {
                return Err(ScriptError::syntax(
                    "unterminated string literal",
                    start_line,
                ));
            }
            if c == '\\' {
                self.advance();
                let Some(escaped) = self.advance() else { continue };
                if !escapes {
                    text.push('\\');
                    text.push(escaped);
                    continue;
                }
                match escaped {
                    'n' => text.push('\n'),
                    't' => text.push('\t'),
                    'r' => text.push('\r'),
                    '0' => text.push('\0'),
                    '\\' => text.push('\\'),
                    '\'' => text.push('\''),
                    '"' => text.push('"'),
                    '\n' => {}
                    other => {
                        text.push('\\');
                        text.push(other);
                    }
                }
                continue;
            }
            text.push(c);
            self.advance();
        }
    }

    fn read_operator(&mut self) -> ScriptResult<()> {
        let line = self.line;
        for op in OPERATORS {
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, ch)| self.peek_at(i) == Some(ch));
            if matches {
                for _ in 0..op.len() {
                    self.advance();
                }
                match *op {
                    "(" | "[" => self.depth += 1,
                    ")" | "]" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op), line);
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or(' ');
        Err(ScriptError::syntax(
            format!("invalid character '{}'", c),
            line,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        tokenize(source)
            .expect("tokenize")
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn test_indentation_tokens() {
        let toks = kinds("if x:\n    y = 1\nz = 2\n");
        assert!(toks.contains(&Tok::Indent));
        assert!(toks.contains(&Tok::Dedent));
        assert_eq!(toks.last(), Some(&Tok::Eof));
    }

    #[test]
    fn test_blank_and_comment_lines_are_ignored() {
        let toks = kinds("x = 1\n\n   # comment\ny = 2");
        assert!(!toks.contains(&Tok::Indent));
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 2);
    }

    #[test]
    fn test_newlines_inside_brackets_are_joined() {
        let toks = kinds("x = [1,\n     2]\n");
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 1);
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn test_numbers_and_strings() {
        let toks = kinds("a = 0x1F + 2.5e1 + 'hi\\n' + \"\"\"multi\nline\"\"\"");
        assert!(toks.contains(&Tok::Int(31)));
        assert!(toks.contains(&Tok::Float(25.0)));
        assert!(toks.contains(&Tok::Str("hi\n".into())));
        assert!(toks.contains(&Tok::Str("multi\nline".into())));
    }

    #[test]
    fn test_operators_prefer_longest_match() {
        let toks = kinds("a //= 2 ** 3");
        assert!(toks.contains(&Tok::Op("//=")));
        assert!(toks.contains(&Tok::Op("**")));
    }

    #[test]
    fn test_bad_dedent_is_syntax_error() {
        let err = tokenize("if x:\n        a = 1\n    b = 2\n").unwrap_err();
        assert_eq!(err.kind, super::super::error::ErrorKind::Syntax);
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("x = 'abc\n").unwrap_err();
        assert!(err.message.contains("unterminated"));
        assert_eq!(err.line, Some(1));
    }

    #[test]
    fn test_line_numbers_follow_source() {
        let tokens = tokenize("a = 1\n\nb = 2\n").expect("tokenize");
        let b = tokens
            .iter()
            .find(|t| t.tok == Tok::Name("b".into()))
            .expect("b token");
        assert_eq!(b.line, 3);
    }
}
