//! Locate command - Show the guest module search path.

use anyhow::{Result, bail};
use serde::Serialize;

use suola_guest::{MODULE_ENV_VAR, candidate_paths, locate_in};

use super::print_json;
use crate::OutputFormat;

#[derive(Debug, Serialize)]
struct Candidate {
    path: String,
    exists: bool,
}

#[derive(Debug, Serialize)]
struct LocateResult {
    env_var: &'static str,
    candidates: Vec<Candidate>,
    found: Option<String>,
}

/// Execute the locate command.
pub fn execute(format: OutputFormat) -> Result<()> {
    let paths = candidate_paths();
    let found = locate_in(&paths).ok();

    let result = LocateResult {
        env_var: MODULE_ENV_VAR,
        candidates: paths
            .iter()
            .map(|path| Candidate {
                path: path.display().to_string(),
                exists: path.is_file(),
            })
            .collect(),
        found: found.as_ref().map(|path| path.display().to_string()),
    };

    match format {
        OutputFormat::Human => {
            println!("Search order (override with {}):", result.env_var);
            for candidate in &result.candidates {
                let mark = if candidate.exists { "+" } else { " " };
                println!("  {} {}", mark, candidate.path);
            }
            match &result.found {
                Some(path) => println!("\nUsing: {}", path),
                None => println!("\nNo module found"),
            }
        }
        OutputFormat::Json | OutputFormat::JsonCompact => print_json(&result, format)?,
    }

    if result.found.is_none() {
        bail!("Guest module not found");
    }
    Ok(())
}
