//! testplan output parsing.
//!
//! testplan organizes tests as application (multitest), suite and case.
//! Discovery reads either the JSON report written by `--json <file>` or the
//! pattern listing printed by `--list`; results come from the per-multitest
//! JUnit reports written by `--xml <dir>`, or from a JSON report that carries
//! case statuses.
//!
//! # Pattern Listing
//!
//! ```text
//! Primary
//!   Primary::AlphaSuite
//!     Primary::AlphaSuite::test_equality
//! ```
//!
//! Each line is the full pattern of one node. Its rank is the number of
//! `::` separators it contains, so the listing is a pre-order walk of the
//! tree and is rebuilt with a stack of open ancestors.
//!
//! # Test ID Format
//!
//! Every node id is its pattern (`App`, `App::Suite`, `App::Suite::case`),
//! which testplan accepts back via `--patterns`. The `id` fields of the JSON
//! report are not read: ids are always rebuilt from names, so JSON discovery,
//! pattern discovery and XML results name the same node the same way.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    FrameworkResult, ReportSource, ResultEvent, SuiteNode, TestLeaf, TestNode, TestOutputParser,
    TestState, into_root,
};
use crate::config::TestplanConfig;
use crate::disambiguate::disambiguate_tree;
use crate::report::junit::JunitReport;
use crate::report::junit_adapter::{DottedModuleMatcher, IdContext, JunitFormat};
use crate::util::{distinct_by_last, first_line, resolve_path};

/// Separator of pattern segments.
pub const PATTERN_SEPARATOR: &str = "::";

/// Deepest rank a pattern can have: application, suite, case.
const MAX_RANK: usize = 2;

/// Which discovery output the parser is given.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Listing {
    /// JSON report tree.
    #[default]
    Json,

    /// `--list` pattern lines.
    Pattern,
}

#[derive(Debug, Default, Deserialize)]
struct JsonReport {
    #[serde(default)]
    tests: Option<Vec<JsonApp>>,
}

#[derive(Debug, Deserialize)]
struct JsonApp {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    test_suites: Option<Vec<JsonSuite>>,
}

#[derive(Debug, Deserialize)]
struct JsonSuite {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<Location>,
    #[serde(default)]
    test_cases: Option<Vec<JsonCase>>,
}

#[derive(Debug, Deserialize)]
struct JsonCase {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<Location>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Location {
    file: String,
    #[serde(default)]
    line_no: Option<u32>,
}

/// Output parser for testplan.
pub struct TestplanParser {
    config: TestplanConfig,
}

impl TestplanParser {
    pub fn new(config: TestplanConfig) -> Self {
        Self { config }
    }

    /// Parses the discovery output in the configured listing format.
    pub fn parse_discovery(&self, output: &str, cwd: &Path) -> FrameworkResult<Vec<TestNode>> {
        match self.config.listing {
            Listing::Json => parse_json_tree(output, cwd),
            Listing::Pattern => Ok(parse_pattern_listing(output)),
        }
    }
}

#[async_trait]
impl TestOutputParser for TestplanParser {
    fn name(&self) -> &'static str {
        "testplan"
    }

    async fn discover(&self, source: &ReportSource, cwd: &Path) -> Option<TestNode> {
        let output = match source.read_text().await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("testplan discovery output unavailable: {}", e);
                return None;
            }
        };

        let apps = match self.parse_discovery(&output, cwd) {
            Ok(apps) => apps,
            Err(e) => {
                tracing::warn!(
                    "Failed to parse testplan report {}: {}",
                    source.origin(),
                    e
                );
                return None;
            }
        };

        let mut root = into_root(self.name(), self.name(), apps)?;
        disambiguate_tree(&mut root, PATTERN_SEPARATOR);
        Some(root)
    }

    async fn results(&self, source: &ReportSource, cwd: &Path) -> Vec<ResultEvent> {
        let reports = match source.read_all("xml").await {
            Ok(reports) => reports,
            Err(e) => {
                tracing::warn!("testplan reports unavailable at {}: {}", source.origin(), e);
                return Vec::new();
            }
        };

        let events = reports
            .iter()
            .flat_map(|(path, content)| {
                if content.trim_start().starts_with('{') {
                    parse_json_results(content).unwrap_or_else(|e| {
                        tracing::warn!("Failed to parse testplan report {}: {}", path.display(), e);
                        Vec::new()
                    })
                } else {
                    parse_xml_results(content, path, cwd)
                }
            })
            .collect();
        distinct_by_last(events, |event: &ResultEvent| event.test.clone())
    }
}

/// Maps the JSON report onto application, suite and case nodes.
///
/// Only the first line of a description is shown; the full text becomes the
/// tooltip.
pub fn parse_json_tree(json: &str, cwd: &Path) -> FrameworkResult<Vec<TestNode>> {
    let report = parse_json_report(json)?;

    let apps = report
        .tests
        .unwrap_or_default()
        .into_iter()
        .map(|app| {
            let app_id = app.name.clone();
            let mut app_node =
                described(SuiteNode::new(app_id.as_str(), app.name), app.description);

            for suite in app.test_suites.unwrap_or_default() {
                let suite_id = join_pattern(&[app_id.as_str(), suite.name.as_str()]);
                let mut suite_node = described(
                    SuiteNode::new(suite_id.as_str(), suite.name.as_str()),
                    suite.description,
                );
                if let Some(location) = &suite.location {
                    suite_node.file = Some(resolve_path(cwd, &location.file));
                    suite_node.line = location.line_no;
                }

                for case in suite.test_cases.unwrap_or_default() {
                    let case_id = join_pattern(&[suite_id.as_str(), case.name.as_str()]);
                    let mut leaf =
                        described_leaf(TestLeaf::new(case_id, case.name), case.description);
                    if let Some(location) = &case.location {
                        leaf.file = Some(resolve_path(cwd, &location.file));
                        leaf.line = location.line_no;
                    }
                    suite_node.children.push(leaf.into());
                }
                app_node.children.push(suite_node.into());
            }
            app_node.into()
        })
        .collect();

    Ok(apps)
}

/// Rebuilds the tree from `--list` pattern lines.
///
/// Lines deeper than a case, or whose parent was never listed, are dropped.
pub fn parse_pattern_listing(output: &str) -> Vec<TestNode> {
    // open ancestors: stack[rank] is the node of that rank
    let mut stack: Vec<TestNode> = Vec::new();
    let mut apps: Vec<TestNode> = Vec::new();

    for line in output.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let segments: Vec<&str> = line.split(PATTERN_SEPARATOR).collect();
        let rank = segments.len() - 1;
        if rank > MAX_RANK || segments.iter().any(|segment| segment.trim().is_empty()) {
            tracing::debug!("Skipping testplan listing line: {}", line);
            continue;
        }
        if rank > stack.len() {
            tracing::debug!("Skipping testplan listing line without parent: {}", line);
            continue;
        }

        close_to(&mut stack, rank, &mut apps);
        let label = segments[rank].trim();
        let node: TestNode = if rank == MAX_RANK {
            TestLeaf::new(line, label).into()
        } else {
            SuiteNode::new(line, label).into()
        };
        stack.push(node);
    }

    close_to(&mut stack, 0, &mut apps);
    apps
}

/// Pops open nodes until `depth` remain, attaching each to its parent.
fn close_to(stack: &mut Vec<TestNode>, depth: usize, apps: &mut Vec<TestNode>) {
    while stack.len() > depth {
        let Some(node) = stack.pop() else {
            break;
        };
        match stack.last_mut() {
            Some(TestNode::Suite(parent)) => parent.children.push(node),
            Some(TestNode::Test(_)) => {}
            None => apps.push(node),
        }
    }
}

/// Reads one testplan JUnit report.
///
/// The application is the report's `<testsuites name>`, or the file stem
/// when the report does not name it.
pub fn parse_xml_results(xml: &str, path: &Path, cwd: &Path) -> Vec<ResultEvent> {
    let origin = if path.as_os_str().is_empty() {
        "<stdin>".to_string()
    } else {
        path.display().to_string()
    };
    let Some(report) = JunitReport::parse_lenient(xml, &origin) else {
        return Vec::new();
    };

    let stem = path.file_stem().map(|stem| stem.to_string_lossy().into_owned());
    let Some(app) = report.name.clone().or(stem) else {
        tracing::warn!(
            "Ignoring testplan report {}: no application name in <testsuites> or the file name",
            origin
        );
        return Vec::new();
    };
    let matcher = DottedModuleMatcher::default();
    let ctx = IdContext {
        cwd,
        app: Some(app.as_str()),
        matcher: &matcher,
    };

    report
        .cases()
        .filter_map(|(suite, case)| {
            let id = JunitFormat::Testplan.to_test_id(&ctx, suite, case);
            if id.is_none() {
                tracing::debug!("Dropping testplan testcase {:?} in {}", case.name, origin);
            }
            Some(case.to_event(id?))
        })
        .collect()
}

/// Reads case results from a JSON report that carries statuses.
pub fn parse_json_results(json: &str) -> FrameworkResult<Vec<ResultEvent>> {
    let report = parse_json_report(json)?;

    let mut events = Vec::new();
    for app in report.tests.unwrap_or_default() {
        for suite in app.test_suites.unwrap_or_default() {
            for case in suite.test_cases.unwrap_or_default() {
                let Some(state) = case.status.as_deref().and_then(map_status) else {
                    continue;
                };
                let id = join_pattern(&[app.name.as_str(), suite.name.as_str(), case.name.as_str()]);
                events.push(ResultEvent::new(id, state).with_message(case.message));
            }
        }
    }
    Ok(events)
}

/// Maps testplan's status vocabulary onto the canonical states.
fn map_status(status: &str) -> Option<TestState> {
    match status {
        "passed" => Some(TestState::Passed),
        "failed" | "error" => Some(TestState::Failed),
        "skipped" => Some(TestState::Skipped),
        _ => None,
    }
}

fn parse_json_report(json: &str) -> FrameworkResult<JsonReport> {
    let report: Option<JsonReport> = serde_json::from_str(json.trim())?;
    Ok(report.unwrap_or_default())
}

fn join_pattern(segments: &[&str]) -> String {
    segments.join(PATTERN_SEPARATOR)
}

fn described(mut suite: SuiteNode, description: Option<String>) -> SuiteNode {
    if let Some(text) = description.as_deref()
        && let Some(line) = first_line(text)
    {
        suite.description = Some(line.to_string());
        suite.tooltip = Some(text.trim().to_string());
    }
    suite
}

fn described_leaf(mut leaf: TestLeaf, description: Option<String>) -> TestLeaf {
    if let Some(text) = description.as_deref()
        && let Some(line) = first_line(text)
    {
        leaf.description = Some(line.to_string());
        leaf.tooltip = Some(text.trim().to_string());
    }
    leaf
}
