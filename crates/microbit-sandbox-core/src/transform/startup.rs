//! `on_start` runs once: later definitions and invocations are neutralized.

use tracing::warn;

use super::scan::{code_text, def_header, indent_width, leading_whitespace, LineInfo};

pub const STARTUP_ROUTINE: &str = "on_start";

/// Prefix given to every duplicate `on_start` definition after the first.
pub const IGNORED_STARTUP_PREFIX: &str = "_ignored_on_start_";

pub(crate) const IGNORED_INVOCATION: &str = "pass  # on_start() ignored: already called";

/// Rewrite `lines` in place. Returns a warning per neutralized line.
///
/// Only invocations outside every function body count; a call inside a
/// `def` is an ordinary call and is left alone.
pub(crate) fn enforce_single_startup(lines: &mut [String], info: &[LineInfo]) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut definitions = 0;
    let mut invocations = 0;
    // Indent of the outermost `def` whose body we are in.
    let mut body_of: Option<usize> = None;

    for (index, line) in lines.iter_mut().enumerate() {
        let line_info = &info[index];
        if line_info.frozen {
            continue;
        }
        let indent = indent_width(line);
        if !code_text(line, line_info).trim().is_empty()
            && body_of.is_some_and(|def_indent| indent <= def_indent)
        {
            body_of = None;
        }

        if let Some(header) = def_header(line, line_info) {
            body_of.get_or_insert(indent);
            if header.name == STARTUP_ROUTINE {
                definitions += 1;
                if definitions > 1 {
                    let renamed = format!("{}{}", IGNORED_STARTUP_PREFIX, definitions);
                    line.replace_range(
                        header.name_at..header.name_at + STARTUP_ROUTINE.len(),
                        &renamed,
                    );
                    let message = format!(
                        "line {}: duplicate on_start definition renamed to {}",
                        index + 1,
                        renamed
                    );
                    warn!("{}", message);
                    warnings.push(message);
                }
            }
            continue;
        }

        let code = code_text(line, line_info).trim();
        let invoked = code == "on_start()" || code == "await on_start()";
        if !invoked || body_of.is_some() {
            continue;
        }
        invocations += 1;
        if invocations > 1 {
            let indent = leading_whitespace(line).to_string();
            *line = format!("{}{}", indent, IGNORED_INVOCATION);
            let message = format!("line {}: repeated on_start() call ignored", index + 1);
            warn!("{}", message);
            warnings.push(message);
        }
    }
    warnings
}
