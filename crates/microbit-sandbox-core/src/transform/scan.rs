//! Line-level lexical scanning used by the rewriter.
//!
//! The rewriter works on raw text, so it needs to know which bytes are real
//! code. String state is carried across lines so the body of a triple-quoted
//! literal is never mistaken for code; lines that start inside such a literal
//! are frozen and never edited.

/// Per-line facts derived from the source text.
#[derive(Debug, Clone)]
pub(crate) struct LineInfo {
    /// Starts inside a triple-quoted literal.
    pub frozen: bool,
    /// `true` for bytes outside string literals and comments.
    pub code: Vec<bool>,
    /// Byte offset where a trailing comment starts (or the line length).
    pub code_end: usize,
}

pub(crate) fn scan(lines: &[String]) -> Vec<LineInfo> {
    let mut triple: Option<u8> = None;
    let mut infos = Vec::with_capacity(lines.len());
    for line in lines {
        let frozen = triple.is_some();
        let bytes = line.as_bytes();
        let mut code = vec![false; bytes.len()];
        let mut code_end = bytes.len();
        let mut quote: Option<u8> = None;
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if let Some(q) = triple {
                if b == b'\\' {
                    i += 2;
                    continue;
                }
                if is_triple(bytes, i, q) {
                    triple = None;
                    i += 3;
                    continue;
                }
                i += 1;
                continue;
            }
            if let Some(q) = quote {
                if b == b'\\' {
                    i += 2;
                    continue;
                }
                if b == q {
                    quote = None;
                }
                i += 1;
                continue;
            }
            match b {
                b'#' => {
                    code_end = i;
                    break;
                }
                b'"' | b'\'' if is_triple(bytes, i, b) => {
                    triple = Some(b);
                    i += 3;
                    continue;
                }
                b'"' | b'\'' => quote = Some(b),
                _ => code[i] = true,
            }
            i += 1;
        }
        infos.push(LineInfo {
            frozen,
            code,
            code_end,
        });
    }
    infos
}

fn is_triple(bytes: &[u8], at: usize, quote: u8) -> bool {
    bytes.get(at) == Some(&quote)
        && bytes.get(at + 1) == Some(&quote)
        && bytes.get(at + 2) == Some(&quote)
}

pub(crate) fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Indentation width, with tabs advancing to the next multiple of eight.
pub(crate) fn indent_width(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            _ => break,
        }
    }
    width
}

pub(crate) fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start_matches([' ', '\t']);
    &line[..line.len() - trimmed.len()]
}

pub(crate) fn is_blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Code text of a line with any trailing comment removed.
pub(crate) fn code_text<'a>(line: &'a str, info: &LineInfo) -> &'a str {
    &line[..info.code_end.min(line.len())]
}

/// A `def` header found on a line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DefHeader {
    pub name: String,
    pub is_async: bool,
    /// Byte offset of the `def` keyword.
    pub def_at: usize,
    /// Byte offset of the function name.
    pub name_at: usize,
}

pub(crate) fn def_header(line: &str, info: &LineInfo) -> Option<DefHeader> {
    if info.frozen {
        return None;
    }
    let indent = leading_whitespace(line).len();
    let rest = &line[indent..];
    let (is_async, def_at) = if let Some(after) = rest.strip_prefix("async") {
        let spaced = after.trim_start_matches([' ', '\t']);
        if spaced.len() == after.len() || !spaced.starts_with("def") {
            return None;
        }
        (true, line.len() - spaced.len())
    } else {
        (false, indent)
    };
    let after_def = line[def_at..].strip_prefix("def")?;
    let name_part = after_def.trim_start_matches([' ', '\t']);
    if name_part.len() == after_def.len() {
        return None;
    }
    let name_at = line.len() - name_part.len();
    let name_len = name_part
        .bytes()
        .take_while(|b| is_ident_byte(*b))
        .count();
    if name_len == 0 {
        return None;
    }
    let name = name_part[..name_len].to_string();
    if !name_part[name_len..]
        .trim_start_matches([' ', '\t'])
        .starts_with('(')
    {
        return None;
    }
    Some(DefHeader {
        name,
        is_async,
        def_at,
        name_at,
    })
}

/// Byte offsets where `name(` is called as a standalone expression.
///
/// The name must sit entirely in code, must not continue a longer identifier
/// or an attribute chain, and must be followed by `(`.
pub(crate) fn call_sites(line: &str, info: &LineInfo, name: &str) -> Vec<usize> {
    let bytes = line.as_bytes();
    let mut sites = Vec::new();
    let mut from = 0;
    while let Some(offset) = line.get(from..).and_then(|rest| rest.find(name)) {
        let start = from + offset;
        let end = start + name.len();
        from = start + 1;
        if !(start..end).all(|i| info.code.get(i).copied().unwrap_or(false)) {
            continue;
        }
        if start > 0 {
            let prev = bytes[start - 1];
            if is_ident_byte(prev) || prev == b'.' {
                continue;
            }
        }
        let mut next = end;
        while next < bytes.len() && (bytes[next] == b' ' || bytes[next] == b'\t') {
            next += 1;
        }
        if next >= bytes.len() || bytes[next] != b'(' {
            continue;
        }
        sites.push(start);
    }
    sites
}

/// True when the text before `at` ends with the standalone word `word`.
pub(crate) fn preceded_by_word(line: &str, at: usize, word: &str) -> bool {
    let before = line[..at].trim_end_matches([' ', '\t']);
    match before.strip_suffix(word) {
        Some(head) => head
            .as_bytes()
            .last()
            .map_or(true, |b| !is_ident_byte(*b)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(source: &str) -> Vec<String> {
        source.split('\n').map(str::to_string).collect()
    }

    #[test]
    fn test_strings_and_comments_are_not_code() {
        let src = lines("x = 'basic.pause(1)'  # basic.pause(2)");
        let info = scan(&src);
        assert!(call_sites(&src[0], &info[0], "basic.pause").is_empty());
    }

    #[test]
    fn test_triple_quoted_body_is_frozen() {
        let src = lines("a = 1\ns = \"\"\"\nbasic.pause(1)\n\"\"\"\nbasic.pause(2)");
        let info = scan(&src);
        assert!(!info[0].frozen);
        assert!(!info[1].frozen);
        assert!(info[2].frozen);
        assert!(info[3].frozen);
        assert!(!info[4].frozen);
        assert!(call_sites(&src[2], &info[2], "basic.pause").is_empty());
        assert_eq!(call_sites(&src[4], &info[4], "basic.pause"), vec![0]);
    }

    #[test]
    fn test_attribute_chain_is_not_a_call_site() {
        let src = lines("obj.helper(1) + helper(2) + my_helper(3)");
        let info = scan(&src);
        assert_eq!(call_sites(&src[0], &info[0], "helper"), vec![16]);
    }

    #[test]
    fn test_def_header_parsing() {
        let src = lines("    async  def  blink (n):");
        let info = scan(&src);
        let header = def_header(&src[0], &info[0]).expect("header");
        assert_eq!(header.name, "blink");
        assert!(header.is_async);
        assert_eq!(&src[0][header.def_at..header.def_at + 3], "def");
        assert!(def_header("define(x)", &scan(&lines("define(x)"))[0]).is_none());
    }

    #[test]
    fn test_call_opening_a_literal_is_code() {
        let src = lines("basic.show_leds(\"\"\"\n# . #\n\"\"\")");
        let info = scan(&src);
        assert_eq!(call_sites(&src[0], &info[0], "basic.show_leds"), vec![0]);
        assert!(info[1].frozen);
        assert!(info[2].frozen);
    }

    #[test]
    fn test_preceded_by_word() {
        assert!(preceded_by_word("x = await foo()", 10, "await"));
        assert!(!preceded_by_word("x = noawait foo()", 12, "await"));
    }
}
