//! Transform command - show the program as the interpreter will run it

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use microbit_sandbox_core::transform_with_report;

#[derive(Parser, Debug)]
pub struct TransformCmd {
    /// Program file
    pub file: PathBuf,
}

#[derive(Serialize)]
struct TransformJson<'a> {
    source: &'a str,
    changed: bool,
    awaits_inserted: usize,
    suspend_functions: Vec<&'a str>,
    warnings: &'a [String],
}

impl TransformCmd {
    pub fn execute(&self, json_output: bool) -> Result<()> {
        let source = std::fs::read_to_string(&self.file)
            .with_context(|| format!("Failed to read program {}", self.file.display()))?;
        let transformed = transform_with_report(&source);

        if json_output {
            let json = TransformJson {
                source: &transformed.source,
                changed: transformed.changed(&source),
                awaits_inserted: transformed.awaits_inserted,
                suspend_functions: transformed
                    .suspend_functions
                    .iter()
                    .map(String::as_str)
                    .collect(),
                warnings: &transformed.warnings,
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
        } else {
            for warning in &transformed.warnings {
                eprintln!("\x1b[33mWarning:\x1b[0m {}", warning);
            }
            print!("{}", transformed.source);
            if !transformed.source.ends_with('\n') {
                println!();
            }
        }
        Ok(())
    }
}
