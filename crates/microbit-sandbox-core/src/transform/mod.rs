//! Source rewriting that turns blocking board calls into suspension points.
//!
//! Board programs are written as if `basic.pause(100)` blocks. The runtime is
//! cooperative, so before execution the program text is rewritten:
//!
//! 1. Every call to a blocking board function gains an `await` prefix.
//! 2. Every user function that (transitively) reaches such a call becomes
//!    `async def`, and every call site of it gains `await`.
//! 3. Only the first `on_start` definition and invocation survive.
//!
//! The rewrite is purely lexical. Text inside string literals and comments is
//! never touched, and lines that start inside a triple-quoted literal are left
//! as is.
//! The rewrite never fails; whatever it cannot interpret is passed through for
//! the interpreter to report.
//!
//! # Idempotence
//!
//! Calls already prefixed with `await` and headers already declared
//! `async def` are recognized, so running the rewrite twice changes nothing.

mod scan;
mod startup;

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use scan::{
    call_sites, def_header, indent_width, is_blank_or_comment, preceded_by_word, scan, LineInfo,
};

pub use startup::{IGNORED_STARTUP_PREFIX, STARTUP_ROUTINE};

/// Board calls that block the caller until the hardware finishes.
pub const BLOCKING_CALLS: &[&str] = &[
    "basic.pause",
    "basic.show_string",
    "basic.show_number",
    "basic.show_leds",
    "music.play_tone",
    "music.rest",
];

const SUSPEND_MARKER: &str = "await ";

/// Result of rewriting a program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transformed {
    pub source: String,
    /// User functions that were (or already were) made `async def`.
    pub suspend_functions: BTreeSet<String>,
    /// Number of `await` prefixes inserted.
    pub awaits_inserted: usize,
    pub warnings: Vec<String>,
}

impl Transformed {
    pub fn changed(&self, original: &str) -> bool {
        self.source != original
    }
}

/// Rewrite program text. Never fails.
pub fn transform(source: &str) -> String {
    transform_with_report(source).source
}

/// Rewrite program text and report what was changed.
pub fn transform_with_report(source: &str) -> Transformed {
    let mut lines: Vec<String> = source.split('\n').map(str::to_string).collect();

    let info = scan(&lines);
    let warnings = startup::enforce_single_startup(&mut lines, &info);
    let info = scan(&lines);

    let functions = find_functions(&lines, &info);
    let suspend = suspend_closure(&lines, &info, &functions);

    let mut awaits_inserted = 0;
    for (index, line) in lines.iter_mut().enumerate() {
        let line_info = &info[index];
        if line_info.frozen {
            continue;
        }
        let mut inserts: Vec<usize> = Vec::new();
        let header = def_header(line, line_info);

        for name in BLOCKING_CALLS {
            for site in call_sites(line, line_info, name) {
                if !preceded_by_word(line, site, "await") {
                    inserts.push(site);
                }
            }
        }
        for name in &suspend {
            for site in call_sites(line, line_info, name) {
                if preceded_by_word(line, site, "def") || preceded_by_word(line, site, "await") {
                    continue;
                }
                inserts.push(site);
            }
        }

        inserts.sort_unstable();
        inserts.dedup();
        for site in inserts.iter().rev() {
            line.insert_str(*site, SUSPEND_MARKER);
        }
        awaits_inserted += inserts.len();

        if let Some(header) = header {
            if !header.is_async && suspend.contains(&header.name) {
                line.insert_str(header.def_at, "async ");
            }
        }
    }

    debug!(
        functions = suspend.len(),
        awaits = awaits_inserted,
        "transformed program"
    );

    Transformed {
        source: lines.join("\n"),
        suspend_functions: suspend,
        awaits_inserted,
        warnings,
    }
}

/// A `def` block and the lines it spans.
#[derive(Debug)]
struct FunctionBlock {
    name: String,
    is_async: bool,
    header: usize,
    /// One past the last body line.
    end: usize,
}

fn find_functions(lines: &[String], info: &[LineInfo]) -> Vec<FunctionBlock> {
    let mut blocks = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        let Some(header) = def_header(line, &info[index]) else {
            continue;
        };
        let indent = indent_width(line);
        let mut end = index + 1;
        while end < lines.len() {
            let body_line = &lines[end];
            if !info[end].frozen
                && !is_blank_or_comment(body_line)
                && indent_width(body_line) <= indent
            {
                break;
            }
            end += 1;
        }
        blocks.push(FunctionBlock {
            name: header.name,
            is_async: header.is_async,
            header: index,
            end,
        });
    }
    blocks
}

/// Functions that can suspend: those calling a blocking board function or a
/// function that can suspend, plus anything already declared `async def`.
fn suspend_closure(
    lines: &[String],
    info: &[LineInfo],
    functions: &[FunctionBlock],
) -> BTreeSet<String> {
    // Innermost enclosing function per line; blocks are ordered by header so
    // nested definitions overwrite their parent.
    let mut owner: Vec<Option<usize>> = vec![None; lines.len()];
    for (i, block) in functions.iter().enumerate() {
        for slot in owner.iter_mut().take(block.end).skip(block.header) {
            *slot = Some(i);
        }
    }

    let names: BTreeSet<&str> = functions.iter().map(|f| f.name.as_str()).collect();
    let mut direct: BTreeSet<String> = BTreeSet::new();
    let mut calls: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for block in functions {
        if block.is_async {
            direct.insert(block.name.clone());
        }
    }

    for (index, line) in lines.iter().enumerate() {
        let Some(owner) = owner[index] else { continue };
        let caller = &functions[owner].name;
        let line_info = &info[index];
        if BLOCKING_CALLS
            .iter()
            .any(|name| !call_sites(line, line_info, name).is_empty())
        {
            direct.insert(caller.clone());
        }
        for callee in &names {
            let invoked = call_sites(line, line_info, callee)
                .into_iter()
                .any(|site| !preceded_by_word(line, site, "def"));
            if invoked {
                calls
                    .entry(caller.clone())
                    .or_default()
                    .insert((*callee).to_string());
            }
        }
    }

    let mut suspend = direct;
    loop {
        let before = suspend.len();
        for (caller, callees) in &calls {
            if !suspend.contains(caller) && callees.iter().any(|c| suspend.contains(c)) {
                suspend.insert(caller.clone());
            }
        }
        if suspend.len() == before {
            break;
        }
    }
    suspend
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_without_blocking_calls_is_unchanged() {
        let source = "x = 1\ndef f(a):\n    return a + 1\nprint(f(x))\n";
        assert_eq!(transform(source), source);
    }

    #[test]
    fn test_blocking_call_gets_await() {
        let source = "basic.show_string(\"Hi\")\nbasic.pause(100)";
        assert_eq!(
            transform(source),
            "await basic.show_string(\"Hi\")\nawait basic.pause(100)"
        );
    }

    #[test]
    fn test_transitive_async_coloring() {
        let source = "\
def blink():
    led.plot(0, 0)
    basic.pause(100)

def twice():
    blink()
    blink()

def pure():
    return 3

twice()
pure()
";
        let expected = "\
async def blink():
    led.plot(0, 0)
    await basic.pause(100)

async def twice():
    await blink()
    await blink()

def pure():
    return 3

await twice()
pure()
";
        let result = transform_with_report(source);
        assert_eq!(result.source, expected);
        assert_eq!(
            result.suspend_functions,
            ["blink", "twice"].iter().map(|s| s.to_string()).collect()
        );
        assert_eq!(result.awaits_inserted, 4);
    }

    #[test]
    fn test_callbacks_passed_by_name_are_not_awaited() {
        let source = "\
def on_forever():
    basic.show_number(1)
basic.forever(on_forever)
";
        let out = transform(source);
        assert!(out.contains("async def on_forever():"));
        assert!(out.contains("basic.forever(on_forever)"));
        assert!(!out.contains("await basic.forever"));
    }

    #[test]
    fn test_strings_and_comments_untouched() {
        let source = "\
print(\"basic.pause(1)\")  # basic.pause(2)
s = '''
basic.pause(3)
'''
basic.pause(4)
";
        let out = transform(source);
        assert!(out.contains("print(\"basic.pause(1)\")  # basic.pause(2)"));
        assert!(out.contains("\nbasic.pause(3)\n"));
        assert!(out.contains("await basic.pause(4)"));
    }

    #[test]
    fn test_member_access_is_not_rewritten() {
        let source = "def wait():\n    basic.pause(1)\nthing.wait()\nwait()\n";
        let out = transform(source);
        assert!(out.contains("thing.wait()"));
        assert!(!out.contains("thing.await"));
        assert!(out.ends_with("await wait()\n"));
    }

    #[test]
    fn test_transform_is_idempotent() {
        let source = "\
def on_start():
    basic.show_leds(\"\"\"
        # . . . #
        \"\"\")
    step()

def step():
    music.play_tone(262, 1)

on_start()
on_start()
";
        let once = transform(source);
        let twice = transform(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_duplicate_on_start_is_neutralized() {
        let source = "\
def on_start():
    basic.show_number(1)
def on_start():
    basic.show_number(2)
on_start()
on_start()
";
        let result = transform_with_report(source);
        let lines: Vec<&str> = result.source.lines().collect();
        assert_eq!(lines[0], "async def on_start():");
        assert_eq!(lines[2], "async def _ignored_on_start_2():");
        assert_eq!(lines[4], "await on_start()");
        assert_eq!(lines[5], "pass  # on_start() ignored: already called");
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_on_start_call_inside_function_does_not_count() {
        let source = "\
def on_start():
    basic.show_number(1)
def helper():
    on_start()
on_start()
if True:
    on_start()
";
        let result = transform_with_report(source);
        let lines: Vec<&str> = result.source.lines().collect();
        assert_eq!(lines[3], "    await on_start()");
        assert_eq!(lines[4], "await on_start()");
        assert_eq!(lines[6], "    pass  # on_start() ignored: already called");
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_nested_functions_are_attributed_separately() {
        let source = "\
def outer():
    def inner():
        basic.pause(1)
    return inner
x = outer()
";
        let out = transform(source);
        assert!(out.contains("    async def inner():"));
        assert!(out.contains("def outer():"));
        assert!(!out.contains("async def outer"));
        assert!(out.contains("x = outer()"));
    }

    #[test]
    fn test_already_awaited_calls_are_left_alone() {
        let source = "async def f():\n    await basic.pause(5)\nawait f()\n";
        assert_eq!(transform(source), source);
    }

    #[test]
    fn test_multiple_calls_on_one_line() {
        let source = "x = [basic.show_number(1), basic.show_number(2)]";
        assert_eq!(
            transform(source),
            "x = [await basic.show_number(1), await basic.show_number(2)]"
        );
    }
}
