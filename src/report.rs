//! Test report reading and result summaries.
//!
//! This module provides the JUnit XML reader shared by the XML-based
//! frameworks, the adapters mapping JUnit attributes back to test ids, and
//! console output for a batch of results.

pub mod junit;
pub mod junit_adapter;

pub use junit::{CaseDetail, JunitCase, JunitReport, JunitSuite};
pub use junit_adapter::{DottedModuleMatcher, IdContext, JunitFormat, ModuleMatcher};

use serde::Serialize;

use crate::framework::{ResultEvent, TestState};

/// Counts of results per canonical state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    /// Tallies a batch of result events.
    pub fn from_events(events: &[ResultEvent]) -> Self {
        let mut summary = Summary {
            total: events.len(),
            ..Default::default()
        };
        for event in events {
            match event.state {
                TestState::Passed => summary.passed += 1,
                TestState::Failed => summary.failed += 1,
                TestState::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    /// Returns `true` if nothing failed.
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Prints a summary of test results to stderr.
///
/// Displays per-state counts with colored output. stdout is left alone so
/// that machine-readable output can be piped.
pub fn print_summary(summary: &Summary) {
    eprintln!();
    eprintln!("Test Results:");
    eprintln!("  Total:   {}", summary.total);
    eprintln!("  Passed:  {}", console::style(summary.passed).green());
    eprintln!("  Failed:  {}", console::style(summary.failed).red());
    eprintln!("  Skipped: {}", console::style(summary.skipped).yellow());

    eprintln!();
    if summary.total == 0 {
        eprintln!(
            "{}",
            console::style("No test results were collected.").red().bold()
        );
    } else if summary.success() {
        eprintln!("{}", console::style("All tests passed!").green().bold());
    } else {
        eprintln!("{}", console::style("Some tests failed.").red().bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let events = vec![
            ResultEvent::new("a", TestState::Passed),
            ResultEvent::new("b", TestState::Failed),
            ResultEvent::new("c", TestState::Skipped),
            ResultEvent::new("d", TestState::Passed),
        ];
        let summary = Summary::from_events(&events);
        assert_eq!(
            summary,
            Summary {
                total: 4,
                passed: 2,
                failed: 1,
                skipped: 1,
            }
        );
        assert!(!summary.success());
    }

    #[test]
    fn test_empty_summary_is_success() {
        let summary = Summary::from_events(&[]);
        assert_eq!(summary.total, 0);
        assert!(summary.success());
    }
}
