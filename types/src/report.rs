//! Validation reports returned alongside partial results.
//!
//! Per-entity problems are never errors of the enclosing operation. They are
//! collected here; `Error` issues cause the entity to be skipped, `Warning`
//! issues do not.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Entity id, or a draft label when no id has been assigned.
    pub subject: String,
    pub field: String,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{level}: {} {}: {}", self.subject, self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntity {
    pub subject: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
    skipped: Vec<SkippedEntity>,
}

impl ValidationReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(
        &mut self,
        subject: impl fmt::Display,
        field: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.push(subject, field, Severity::Warning, message);
    }

    pub fn error(
        &mut self,
        subject: impl fmt::Display,
        field: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.push(subject, field, Severity::Error, message);
    }

    pub fn push(
        &mut self,
        subject: impl fmt::Display,
        field: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) {
        self.issues.push(ValidationIssue {
            subject: subject.to_string(),
            field: field.into(),
            severity,
            message: message.into(),
        });
    }

    /// Record an error when `value` is blank. Returns whether it was present.
    pub fn require(&mut self, subject: impl fmt::Display, field: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.error(subject, field, "required field is missing");
            false
        } else {
            true
        }
    }

    /// Record a warning when `value` is blank. Returns whether it was present.
    pub fn expect(&mut self, subject: impl fmt::Display, field: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.warn(subject, field, "expected field is missing");
            false
        } else {
            true
        }
    }

    pub fn skip(&mut self, subject: impl fmt::Display, reason: impl Into<String>) {
        self.skipped.push(SkippedEntity {
            subject: subject.to_string(),
            reason: reason.into(),
        });
    }

    /// Whether any error was recorded against `subject`.
    #[must_use]
    pub fn has_errors_for(&self, subject: &str) -> bool {
        self.errors().any(|issue| issue.subject == subject)
    }

    /// Skip `subject` if errors were recorded against it. Returns whether it
    /// may still be emitted.
    pub fn admit(&mut self, subject: impl fmt::Display) -> bool {
        let subject = subject.to_string();
        let reasons: Vec<String> = self
            .errors()
            .filter(|issue| issue.subject == subject)
            .map(|issue| format!("{}: {}", issue.field, issue.message))
            .collect();
        if reasons.is_empty() {
            true
        } else {
            self.skip(subject, reasons.join("; "));
            false
        }
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.issues.extend(other.issues);
        self.skipped.extend(other.skipped);
    }

    #[must_use]
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Warning)
    }

    #[must_use]
    pub fn skipped(&self) -> &[SkippedEntity] {
        &self.skipped
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty() && self.skipped.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Severity, ValidationReport};

    #[test]
    fn require_records_error_for_blank() {
        let mut report = ValidationReport::new();
        assert!(!report.require("PAT-000001", "name.family", "  "));
        assert!(report.require("PAT-000001", "name.given", "Ana"));
        assert_eq!(report.issues().len(), 1);
        assert_eq!(report.issues()[0].severity, Severity::Error);
    }

    #[test]
    fn admit_skips_only_erroring_subjects() {
        let mut report = ValidationReport::new();
        report.error("ENC-000002", "start", "missing");
        report.warn("ENC-000001", "facility", "missing");
        assert!(report.admit("ENC-000001"));
        assert!(!report.admit("ENC-000002"));
        assert_eq!(report.skipped().len(), 1);
        assert_eq!(report.skipped()[0].subject, "ENC-000002");
        assert!(report.skipped()[0].reason.contains("start"));
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut report = ValidationReport::new();
        report.warn("CLM-000001", "billing_npi", "expected field is missing");
        assert!(!report.has_errors());
        assert!(!report.is_clean());
        assert_eq!(report.warnings().count(), 1);
    }
}
