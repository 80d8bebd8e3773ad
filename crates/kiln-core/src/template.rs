//! Placeholder substitution for generated deliverables.
//!
//! `@VERSION` becomes the manifest version and `@DATE` the build time in
//! minute precision (`2024-05-01T12:34Z`). Substitution is a single
//! left-to-right pass: text inserted for one placeholder is never scanned
//! again, so a version string containing `@DATE` stays literal.

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;

use crate::fs::write_atomic;

pub const VERSION_PLACEHOLDER: &str = "@VERSION";
pub const DATE_PLACEHOLDER: &str = "@DATE";

/// Values available to the templates for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContext {
    pub version: String,
    pub now: DateTime<Utc>,
}

impl TemplateContext {
    pub fn new(version: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            version: version.into(),
            now,
        }
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("@VERSION|@DATE").expect("placeholder pattern is valid"))
}

/// Minute-precision ISO-8601 UTC timestamp with a literal `Z`.
pub fn format_date(now: &DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%MZ").to_string()
}

/// Replace every placeholder in `content`.
pub fn apply(content: &str, ctx: &TemplateContext) -> String {
    let date = format_date(&ctx.now);
    placeholder_pattern()
        .replace_all(content, |caps: &Captures<'_>| match &caps[0] {
            VERSION_PLACEHOLDER => ctx.version.clone(),
            _ => date.clone(),
        })
        .into_owned()
}

/// Read `src`, substitute placeholders and write the result to `dest`.
/// `src` and `dest` may be the same file.
pub fn copy_templated(src: &Path, dest: &Path, ctx: &TemplateContext) -> std::io::Result<()> {
    let content = std::fs::read_to_string(src)?;
    write_atomic(dest, apply(&content, ctx).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> TemplateContext {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 34, 56).unwrap()
            + chrono::Duration::milliseconds(789);
        TemplateContext::new("3.2.1", now)
    }

    #[test]
    fn test_replaces_every_occurrence() {
        let out = apply("v@VERSION (@DATE) v@VERSION", &ctx());
        assert_eq!(out, "v3.2.1 (2024-05-01T12:34Z) v3.2.1");
    }

    #[test]
    fn test_date_format_is_minute_precision() {
        let date = format_date(&ctx().now);
        assert_eq!(date, "2024-05-01T12:34Z");
        let shape = Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}Z$").unwrap();
        assert!(shape.is_match(&date));
        assert!(shape.is_match(&format_date(&Utc::now())));
    }

    #[test]
    fn test_idempotent_without_placeholders() {
        let once = apply("/*! lib @VERSION @DATE */", &ctx());
        let twice = apply(&once, &ctx());
        assert_eq!(once, twice);
        assert!(!once.contains("@VERSION"));
        assert!(!once.contains("@DATE"));
    }

    #[test]
    fn test_replacement_is_not_rescanned() {
        let ctx = TemplateContext::new("1.0.0-@DATE", ctx().now);
        assert_eq!(apply("@VERSION", &ctx), "1.0.0-@DATE");
    }

    #[test]
    fn test_other_text_untouched() {
        let input = "email@example.com @VERSIO @date ünïcödé";
        assert_eq!(apply(input, &ctx()), input);
    }

    #[test]
    fn test_copy_templated_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.js");
        std::fs::write(&path, "/* @VERSION @DATE */").unwrap();

        copy_templated(&path, &path, &ctx()).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "/* 3.2.1 2024-05-01T12:34Z */"
        );
    }
}
