//! End-to-end signing against the packaged rule-engine module.
//!
//! These tests run only when the module can be located (see
//! `SUOLA_MODULE`); otherwise they return early.

use std::path::{Path, PathBuf};

use suola_guest::prelude::*;
use suola_guest::{GuestError, locate_module};

fn module_or_skip() -> Option<PathBuf> {
    match locate_module() {
        Ok(path) => Some(path),
        Err(err) => {
            eprintln!("skipping: {err}");
            None
        }
    }
}

fn write_rules(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join("rules.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

fn is_lower_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

const EXAMPLE_RULES: &str = r#"
sites:
  - domain: example.com
    templates:
      - pattern: "/(?P<ArticleID>[^/]+)"
        template: "https://example.com/{{ .ArticleID }}"
    tests:
      - url: "https://example.com/test-article"
        expected: "https://example.com/test-article"
  - domain: transform.example
    templates:
      - pattern: "/(?P<Category>[^/]+)/(?P<Slug>[^/]+)"
        template: "https://transform.example/{{ .Category }}/{{ .Slug }}"
        transform:
          Category: "lowercase"
"#;

fn invoker_with_rules(module: PathBuf, dir: &Path) -> GuestInvoker {
    let rules = write_rules(dir, EXAMPLE_RULES);
    let config = GuestConfig::default()
        .with_module_path(module)
        .with_rule_source(rules)
        .with_inherit_stderr(false);
    GuestInvoker::new(config).unwrap()
}

#[test]
fn test_custom_rule_signature_is_stable() {
    let Some(module) = module_or_skip() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let invoker = invoker_with_rules(module, dir.path());

    let first = invoker.signature("https://example.com/test-article").unwrap();
    let second = invoker.signature("https://example.com/test-article").unwrap();
    assert!(is_lower_hex_digest(&first), "unexpected signature {first:?}");
    assert_eq!(first, second);
}

#[test]
fn test_unknown_domain_then_recovery() {
    let Some(module) = module_or_skip() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let invoker = invoker_with_rules(module, dir.path());

    let miss = invoker.signature("https://unconfigured.invalid/whatever");
    assert!(matches!(miss, Err(GuestError::GuestReported(_))), "got {miss:?}");

    let hit = invoker.signature("https://example.com/test-article").unwrap();
    assert!(is_lower_hex_digest(&hit));
}

#[test]
fn test_lowercase_transform_folds_case() {
    let Some(module) = module_or_skip() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let invoker = invoker_with_rules(module, dir.path());

    let upper = invoker
        .signature("https://transform.example/NEWS/breaking-story")
        .unwrap();
    let lower = invoker
        .signature("https://transform.example/news/breaking-story")
        .unwrap();
    assert_eq!(upper, lower);
}

#[test]
fn test_separate_invokers_agree() {
    let Some(module) = module_or_skip() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let a = invoker_with_rules(module.clone(), dir.path());
    let b = invoker_with_rules(module, dir.path());

    let url = "https://example.com/test-article";
    assert_eq!(a.signature(url).unwrap(), b.signature(url).unwrap());
    assert_ne!(a.id(), b.id());
}
