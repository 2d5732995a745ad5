//! Structured per-field validation errors.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

pub const MAX_DEVICE_ID_LEN: usize = 100;

/// Field path → messages, plus the target application keys that did not
/// resolve. Field paths use request naming, e.g. `targets[1].appKey`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub errors: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_app_keys: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report with a single field error.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut report = Self::new();
        report.add(field, message);
        report
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Record an unknown or inactive target application.
    pub fn missing_app(&mut self, field: impl Into<String>, app_key: &str) {
        self.add(field, "Application does not exist or is inactive");
        if !self.missing_app_keys.iter().any(|k| k == app_key) {
            self.missing_app_keys.push(app_key.to_string());
        }
    }

    /// Require a non-blank value of at most `max` characters.
    pub fn require(&mut self, field: &str, value: &str, max: usize) {
        if value.is_empty() {
            self.add(field, "Field is required");
        } else {
            self.max_len(field, value, max);
        }
    }

    pub fn max_len(&mut self, field: &str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.add(field, format!("Must be at most {max} characters"));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(())` when nothing was reported.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.errors {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}

/// Trimmed device id, or a `deviceId` error when blank or too long.
pub fn device_id(raw: &str) -> Result<&str, ValidationReport> {
    let device_id = raw.trim();
    let mut report = ValidationReport::new();
    report.require("deviceId", device_id, MAX_DEVICE_ID_LEN);
    report.into_result().map(|()| device_id)
}

/// Trim and lowercase an application key.
pub fn normalize_app_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Trimmed value, or `None` when blank.
pub fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn collects_errors_per_field() {
        let mut report = ValidationReport::new();
        report.require("title", "", 100);
        report.require("message", &"x".repeat(11), 10);
        report.require("link", "ok", 10);

        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors["title"], vec!["Field is required"]);
        assert!(report.into_result().is_err());
    }

    #[test]
    fn missing_apps_are_named_once() {
        let mut report = ValidationReport::new();
        report.missing_app("targets[0].appKey", "ghost");
        report.missing_app("targets[2].appKey", "ghost");
        report.missing_app("targets[3].appKey", "phantom");

        assert_eq!(report.missing_app_keys, ["ghost", "phantom"]);
        assert_eq!(report.errors.len(), 3);
    }

    #[test]
    fn serializes_camel_case_and_omits_empty_keys() {
        let json = serde_json::to_value(ValidationReport::single("title", "bad")).unwrap();
        assert_eq!(json["errors"]["title"][0], "bad");
        assert!(json.get("missingAppKeys").is_none());
    }

    #[test]
    fn display_lists_every_message() {
        let mut report = ValidationReport::new();
        report.add("a", "one");
        report.add("b", "two");
        assert_eq!(report.to_string(), "a: one; b: two");
    }

    #[test]
    fn device_ids_are_trimmed_and_required() {
        assert_eq!(device_id("  dev-1 ").unwrap(), "dev-1");

        let blank = device_id(" \t ").unwrap_err();
        assert_eq!(blank.errors["deviceId"], vec!["Field is required"]);

        let long = device_id(&"d".repeat(MAX_DEVICE_ID_LEN + 1)).unwrap_err();
        assert!(long.errors.contains_key("deviceId"));
    }

    #[test]
    fn normalization_helpers() {
        assert_eq!(normalize_app_key("  AcMe "), "acme");
        assert_eq!(non_blank(Some("  ")), None);
        assert_eq!(non_blank(Some(" x ")), Some("x"));
        assert_eq!(non_blank(None), None);
    }
}
