//! Per-stage diagnostics
//!
//! Lower-level functions hand back per-item outcomes; each stage folds them
//! into a [`StageReport`] and logs one summary line at the end instead of
//! failing on the first bad file.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    Skipped,
    Failed,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub filepath: Option<PathBuf>,
    pub kind: DiagnosticKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl StageReport {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            ..Self::default()
        }
    }

    pub fn success(&mut self) {
        self.succeeded += 1;
    }

    pub fn skip(&mut self, filepath: Option<&Path>, message: impl Into<String>) {
        let message = message.into();
        debug!("[{}] skipped {}: {}", self.stage, path_label(filepath), message);
        self.skipped += 1;
        self.push(filepath, DiagnosticKind::Skipped, message);
    }

    pub fn fail(&mut self, filepath: Option<&Path>, message: impl Into<String>) {
        let message = message.into();
        warn!("[{}] failed {}: {}", self.stage, path_label(filepath), message);
        self.failed += 1;
        self.push(filepath, DiagnosticKind::Failed, message);
    }

    /// Record a warning that does not change the counts
    pub fn warn(&mut self, filepath: Option<&Path>, message: impl Into<String>) {
        let message = message.into();
        warn!("[{}] {}: {}", self.stage, path_label(filepath), message);
        self.push(filepath, DiagnosticKind::Warning, message);
    }

    /// Carry over another report's diagnostics without its counts
    pub fn merge_diagnostics(&mut self, other: &StageReport) {
        self.diagnostics.extend(other.diagnostics.iter().cloned());
    }

    pub fn diagnostics_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics_of(DiagnosticKind::Warning).count()
    }

    pub fn log_summary(&self) {
        info!(
            "[{}] {} succeeded, {} skipped, {} failed ({} warnings)",
            self.stage,
            self.succeeded,
            self.skipped,
            self.failed,
            self.warning_count()
        );
    }

    fn push(&mut self, filepath: Option<&Path>, kind: DiagnosticKind, message: String) {
        self.diagnostics.push(Diagnostic {
            filepath: filepath.map(Path::to_path_buf),
            kind,
            message,
        });
    }
}

fn path_label(filepath: Option<&Path>) -> String {
    filepath
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_diagnostics() {
        let mut report = StageReport::new("crop");
        report.success();
        report.skip(Some(Path::new("a/2/x.jpg")), "unrecognized camera folder");
        report.fail(Some(Path::new("a/0/y.jpg")), "missing");
        report.warn(None, "overlap");

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.warning_count(), 1);
        assert_eq!(report.diagnostics.len(), 3);

        let failed: Vec<_> = report.diagnostics_of(DiagnosticKind::Failed).collect();
        assert_eq!(failed[0].filepath.as_deref(), Some(Path::new("a/0/y.jpg")));
    }

    #[test]
    fn test_merge_diagnostics_keeps_counts() {
        let mut outer = StageReport::new("assign");
        let mut inner = StageReport::new("resolve");
        inner.success();
        inner.warn(None, "unresolved boundary");
        outer.merge_diagnostics(&inner);

        assert_eq!(outer.stage, "assign");
        assert_eq!(outer.succeeded, 0);
        assert_eq!(outer.warning_count(), 1);
    }
}
