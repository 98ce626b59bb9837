//! Check command - Compare URL signatures with expected values.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::{Deserialize, Serialize};

use suola::SignatureService;

use super::{ServiceArgs, print_json};
use crate::OutputFormat;

/// Arguments for the check command.
#[derive(Args)]
pub struct CheckArgs {
    /// JSON file with `[{ "url": ..., "signature": ... }]` cases
    #[arg(required = true)]
    pub cases: PathBuf,

    #[command(flatten)]
    pub service: ServiceArgs,
}

/// One case from the cases file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Case {
    /// URL to sign.
    pub url: String,
    /// Expected signature. Without one, any signature passes.
    #[serde(default)]
    pub signature: Option<String>,
}

/// Result of one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Signature matched, or any signature was accepted.
    Pass,
    /// No signature was produced.
    Miss,
    /// A different signature was produced.
    Mismatch,
}

#[derive(Debug, Serialize)]
struct CaseReport {
    url: String,
    verdict: Verdict,
    expected: Option<String>,
    actual: Option<String>,
}

/// Read a cases file.
pub fn load_cases(path: &Path) -> Result<Vec<Case>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid cases file {}", path.display()))
}

/// Judge a produced signature against a case.
pub fn judge(case: &Case, actual: Option<&str>) -> Verdict {
    match (actual, case.signature.as_deref()) {
        (None, _) => Verdict::Miss,
        (Some(_), None) => Verdict::Pass,
        (Some(actual), Some(expected)) if actual.eq_ignore_ascii_case(expected) => Verdict::Pass,
        (Some(_), Some(_)) => Verdict::Mismatch,
    }
}

fn run_case(service: &SignatureService, case: &Case) -> Result<CaseReport> {
    let actual = service
        .signature_of(&case.url)
        .with_context(|| format!("Invalid case URL {:?}", case.url))?;
    Ok(CaseReport {
        url: case.url.clone(),
        verdict: judge(case, actual.as_deref()),
        expected: case.signature.clone(),
        actual,
    })
}

/// Execute the check command.
pub fn execute(
    args: CheckArgs,
    config: Option<&Path>,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let cases = load_cases(&args.cases)?;
    let service = args.service.build(config)?;

    let reports = cases
        .iter()
        .map(|case| run_case(&service, case))
        .collect::<Result<Vec<_>>>()?;
    let failed = reports
        .iter()
        .filter(|r| r.verdict != Verdict::Pass)
        .count();

    match format {
        OutputFormat::Human => {
            for report in &reports {
                match report.verdict {
                    Verdict::Pass if quiet => {}
                    Verdict::Pass => println!("ok        {}", report.url),
                    Verdict::Miss => println!("MISS      {}", report.url),
                    Verdict::Mismatch => {
                        println!("MISMATCH  {}", report.url);
                        println!(
                            "  expected: {}",
                            report.expected.as_deref().unwrap_or("-")
                        );
                        println!("  actual:   {}", report.actual.as_deref().unwrap_or("-"));
                    }
                }
            }
            if !quiet {
                println!(
                    "\n{} passed, {} failed",
                    reports.len() - failed,
                    failed
                );
            }
        }
        OutputFormat::Json | OutputFormat::JsonCompact => print_json(&reports, format)?,
    }

    if failed > 0 {
        bail!("{} of {} cases failed", failed, reports.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(signature: Option<&str>) -> Case {
        Case {
            url: "https://example.com/a".to_string(),
            signature: signature.map(String::from),
        }
    }

    #[test]
    fn test_judge() {
        assert_eq!(judge(&case(None), Some("abc")), Verdict::Pass);
        assert_eq!(judge(&case(Some("abc")), Some("ABC")), Verdict::Pass);
        assert_eq!(judge(&case(Some("abc")), Some("abd")), Verdict::Mismatch);
        assert_eq!(judge(&case(Some("abc")), None), Verdict::Miss);
        assert_eq!(judge(&case(None), None), Verdict::Miss);
    }

    #[test]
    fn test_load_cases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.json");
        fs::write(
            &path,
            r#"[
                {"url": "https://example.com/a", "signature": "abc"},
                {"url": "https://example.com/b"}
            ]"#,
        )
        .unwrap();

        let cases = load_cases(&path).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].signature.as_deref(), Some("abc"));
        assert_eq!(cases[1].signature, None);
    }

    #[test]
    fn test_load_cases_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.json");
        fs::write(&path, "{not json").unwrap();
        assert!(load_cases(&path).is_err());
    }
}
